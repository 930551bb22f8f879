//! Request contexts: the lifetime of request-scoped collapsers.

use tracing::{debug, warn};
use uuid::Uuid;

use super::CollapserTable;
use crate::collapser::RequestCollapser;
use crate::Result;

/// One logical request context.
///
/// Request-scoped collapsers created through a context are only visible to
/// it. [`close`](Self::close) seals their open windows and waits for the
/// batches to finish; dropping an unclosed context still seals them, without
/// waiting, and refuses further submissions to them.
pub struct RequestContext<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    id: Uuid,
    collapsers: CollapserTable<A, R>,
}

impl<A, R> RequestContext<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new() -> Self {
        let id = Uuid::new_v4();
        debug!(context = %id, "request context started");
        Self {
            id,
            collapsers: CollapserTable::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request-scoped collapser for `key`, if one was created in this context.
    pub fn get(&self, key: &str) -> Option<RequestCollapser<A, R>> {
        self.collapsers.get(key)
    }

    pub fn len(&self) -> usize {
        self.collapsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn table(&self) -> &CollapserTable<A, R> {
        &self.collapsers
    }

    /// End the context: force-seal every open window and wait for execution.
    pub async fn close(self) -> Result<()> {
        let collapsers = self.collapsers.drain();
        debug!(context = %self.id, collapsers = collapsers.len(), "closing request context");
        let results =
            futures::future::join_all(collapsers.iter().map(|c| c.shutdown())).await;
        results.into_iter().collect()
    }
}

impl<A, R> Default for RequestContext<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A, R> Drop for RequestContext<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    fn drop(&mut self) {
        for collapser in self.collapsers.drain() {
            if let Err(e) = collapser.close() {
                warn!(context = %self.id, collapser = %collapser.key(), error = %e, "failed to close collapser on context drop");
            }
        }
    }
}
