use std::sync::Arc;

use async_trait::async_trait;
use tracery_events::Event;
use tracery_indexing_store::{IndexingBackend, IndexingStore};
use tracery_primitives::Chain;

use crate::{HandlerError, ReadOnlyClient};

/// Everything a callback may touch while handling one event.
///
/// Rebuilt (cheaply) per event by the dispatcher; the store handle is the
/// dispatcher's own cache, so writes made here participate in the next
/// flush-and-commit.
pub struct IndexingContext<'a> {
    pub chain: Arc<Chain>,
    pub client: &'a ReadOnlyClient,
    pub db: &'a mut IndexingStore<dyn IndexingBackend + Send + Sync>,
}

impl std::fmt::Debug for IndexingContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingContext")
            .field("chain", &self.chain.name)
            .finish()
    }
}

/// User-side event processing.
///
/// Implementations map event kinds (usually by `callback_index`) to the
/// actual indexing logic. Must tolerate redelivery: an event may be seen
/// again after a retryable failure or a crash before checkpoint commit.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        event: &Event,
        context: &mut IndexingContext<'_>,
    ) -> Result<(), HandlerError>;
}
