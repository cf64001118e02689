//! Waits for the token controller to finish initializing ServiceAccounts
//! and their token Secrets.

use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::api::Api;
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use tracing::{event, Level};

use crate::cluster::{self, ServerVersion};
use crate::config::AwaitConfig;
use crate::error::{AwaitError, Target};
use crate::logging::Severity;
use crate::watch::{self, Event};

pub const SECRET_TIMEOUT: Duration = Duration::from_secs(5);
pub const SERVICE_ACCOUNT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub const SERVICE_ACCOUNT_TOKEN: &str = "kubernetes.io/service-account-token";

/// Clusters from this release on no longer generate token Secrets for
/// ServiceAccounts.
pub const TOKENS_GENERATED_BEFORE: ServerVersion = ServerVersion::new(1, 24, 0);

pub fn is_token_secret(secret: &Secret) -> bool {
    secret.type_.as_deref() == Some(SERVICE_ACCOUNT_TOKEN)
}

pub fn token_populated(secret: &Secret) -> bool {
    secret.data.as_ref().map_or(false, |data| !data.is_empty())
}

fn secret_count(account: &ServiceAccount) -> usize {
    account.secrets.as_ref().map_or(0, Vec::len)
}

/// Watches `events` until `ready` holds for the configured object.
pub(crate) async fn watch_until<K, F>(
    config: &AwaitConfig<K>,
    events: BoxStream<'static, Event<K>>,
    timeout: Duration,
    waiting_for: &str,
    ready: F,
) -> Result<(), AwaitError>
where
    K: Resource + Serialize,
    F: Fn(&K) -> bool,
{
    let mut events = events.fuse();
    let cancel = config.cancel.clone();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let name = config.name();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(AwaitError::cancelled(
                    Target::from_resource(&config.object),
                    [waiting_for.to_string()],
                ));
            }
            _ = &mut deadline => {
                return Err(AwaitError::timed_out(
                    Target::from_resource(&config.object),
                    [waiting_for.to_string()],
                ));
            }
            Some(event) = events.next() => {
                if let Event::Applied(obj) = event {
                    if obj.name_any() == name && ready(&obj) {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Waits for a `kubernetes.io/service-account-token` Secret to be filled
/// in. Other Secrets are ready as soon as they exist.
pub async fn await_secret(client: &Client, config: &AwaitConfig<Secret>) -> Result<(), AwaitError> {
    if !is_token_secret(&config.object) {
        return Ok(());
    }
    let secrets = watch::named(
        Api::<Secret>::namespaced(client.clone(), &config.namespace()),
        &config.name(),
    );
    run_secret(config, secrets).await
}

pub(crate) async fn run_secret(
    config: &AwaitConfig<Secret>,
    secrets: BoxStream<'static, Event<Secret>>,
) -> Result<(), AwaitError> {
    watch_until(
        config,
        secrets,
        config.timeout_or(SECRET_TIMEOUT),
        "Secret token has not been populated",
        token_populated,
    )
    .await?;
    config.log(Severity::Info, "✅ Secret token populated");
    Ok(())
}

/// Waits for the token controller to attach a token Secret to a
/// ServiceAccount, on clusters old enough to do so.
pub async fn await_service_account(
    client: &Client,
    config: &AwaitConfig<ServiceAccount>,
) -> Result<(), AwaitError> {
    let version = cluster::server_version(client).await;
    if version >= TOKENS_GENERATED_BEFORE {
        event!(
            Level::DEBUG,
            version = %version,
            "cluster does not generate ServiceAccount tokens"
        );
        return Ok(());
    }
    let accounts = watch::named(
        Api::<ServiceAccount>::namespaced(client.clone(), &config.namespace()),
        &config.name(),
    );
    run_service_account(config, accounts).await
}

/// The Secrets listed in the configured object were requested by the user;
/// the account is ready once the controller has added at least one more.
pub(crate) async fn run_service_account(
    config: &AwaitConfig<ServiceAccount>,
    accounts: BoxStream<'static, Event<ServiceAccount>>,
) -> Result<(), AwaitError> {
    let requested = secret_count(&config.object);
    watch_until(
        config,
        accounts,
        config.timeout_or(SERVICE_ACCOUNT_TIMEOUT),
        "ServiceAccount has no generated token Secret",
        |account| secret_count(account) > requested,
    )
    .await?;
    config.log(Severity::Info, "✅ ServiceAccount token Secret attached");
    Ok(())
}
