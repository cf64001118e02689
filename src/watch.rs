use std::fmt::Debug;

use futures::stream::{self, BoxStream, StreamExt};
use kube::api::Api;
use kube::Resource;
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use tracing::{event, Level};

/// A change to a watched object.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<K> {
    /// The object was added, or modified.
    Applied(K),
    Deleted(K),
}

impl<K> Event<K> {
    pub fn object(&self) -> &K {
        match self {
            Event::Applied(obj) | Event::Deleted(obj) => obj,
        }
    }
}

/// Opens a watch on `api` and flattens it into a stream of [`Event`]s.
///
/// Relists are replayed as applied events. Watch errors are logged and
/// dropped; the underlying watcher reconnects on its own. Dropping the
/// stream closes the watch.
pub fn events<K>(api: Api<K>, config: watcher::Config) -> BoxStream<'static, Event<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher::watcher(api, config)
        .flat_map(|result| {
            let events = match result {
                Ok(watcher::Event::Applied(obj)) => vec![Event::Applied(obj)],
                Ok(watcher::Event::Deleted(obj)) => vec![Event::Deleted(obj)],
                Ok(watcher::Event::Restarted(objs)) => {
                    objs.into_iter().map(Event::Applied).collect()
                }
                Err(err) => {
                    event!(Level::WARN, err = %err, "dropping failed watch event");
                    Vec::new()
                }
            };
            stream::iter(events)
        })
        .boxed()
}

/// Watches a single object by name.
pub fn named<K>(api: Api<K>, name: &str) -> BoxStream<'static, Event<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    events(
        api,
        watcher::Config::default().fields(&format!("metadata.name={}", name)),
    )
}

/// Watches every object `api` can see.
pub fn all<K>(api: Api<K>) -> BoxStream<'static, Event<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    events(api, watcher::Config::default())
}
