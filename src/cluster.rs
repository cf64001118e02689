use std::fmt;

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::Client;
use tracing::{event, Level};

use crate::retry::{retry_with_backoff, RetryConfig};

/// The Kubernetes version a cluster reports.
///
/// Field order matters: the derived ordering compares major, then minor,
/// then patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The version assumed when discovery fails.
    pub const DEFAULT: ServerVersion = ServerVersion::new(1, 9, 0);

    /// Parses the `/version` document. Managed clusters often report a
    /// minor version such as `"27+"`, and some report nothing useful in
    /// `major`/`minor` at all, in which case `gitVersion` is used.
    pub fn from_info(info: &Info) -> Option<Self> {
        let major = info.major.trim().parse().ok();
        let minor = info.minor.trim().trim_end_matches('+').parse().ok();
        if let (Some(major), Some(minor)) = (major, minor) {
            let patch = parse_git_version(&info.git_version)
                .map(|v| v.patch)
                .unwrap_or(0);
            return Some(ServerVersion::new(major, minor, patch));
        }
        parse_git_version(&info.git_version)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Parses strings of the form `v1.27.3-gke.100`.
fn parse_git_version(git_version: &str) -> Option<ServerVersion> {
    let rest = git_version.trim().strip_prefix('v')?;
    let mut parts = rest.splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch_str = parts.next()?;
    let digits: String = patch_str.chars().take_while(|c| c.is_ascii_digit()).collect();
    let patch = digits.parse().ok()?;
    Some(ServerVersion::new(major, minor, patch))
}

/// Asks the API server for its version, falling back to
/// [`ServerVersion::DEFAULT`] if it cannot be determined.
pub async fn server_version(client: &Client) -> ServerVersion {
    let config = RetryConfig {
        max_retries: 2,
        ..RetryConfig::default()
    };
    let info = retry_with_backoff(&config, "fetch server version", || client.apiserver_version()).await;
    let parsed = match info {
        Ok(info) => ServerVersion::from_info(&info),
        Err(err) => {
            event!(Level::WARN, err = %err, "failed to query cluster version");
            None
        }
    };
    parsed.unwrap_or_else(|| {
        event!(
            Level::WARN,
            default = %ServerVersion::DEFAULT,
            "cluster version could not be determined; assuming the default"
        );
        ServerVersion::DEFAULT
    })
}
