//! Routing a batch result back onto the slots of its window.

use super::slot::SlotResolver;
use crate::Error;

/// Counts describing how one batch result was distributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxSummary {
    /// Slots resolved with a value.
    pub values: usize,
    /// Slots resolved with an explicit "no value".
    pub absent: usize,
    /// Slots whose caller had already stopped waiting.
    pub abandoned: usize,
    /// Trailing response entries beyond the number of slots.
    pub ignored: usize,
}

/// Maps batch responses to slots by position.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseDemultiplexer;

impl ResponseDemultiplexer {
    pub fn new() -> Self {
        Self
    }

    /// Resolve slot `i` with `responses[i]`.
    ///
    /// The caller guarantees `responses.len() >= resolvers.len()`; excess
    /// entries are ignored. Absent entries resolve as `Ok(None)`.
    pub fn demux<R>(&self, resolvers: Vec<SlotResolver<R>>, responses: Vec<Option<R>>) -> DemuxSummary {
        let mut summary = DemuxSummary {
            ignored: responses.len().saturating_sub(resolvers.len()),
            ..DemuxSummary::default()
        };
        for (resolver, response) in resolvers.into_iter().zip(responses) {
            match response {
                Some(_) => summary.values += 1,
                None => summary.absent += 1,
            }
            if !resolver.resolve(Ok(response)) {
                summary.abandoned += 1;
            }
        }
        summary
    }

    /// Resolve every slot with the same failure. Returns the number of abandoned slots.
    pub fn broadcast<R>(&self, resolvers: Vec<SlotResolver<R>>, error: &Error) -> usize {
        resolvers
            .into_iter()
            .map(|resolver| resolver.resolve(Err(error.clone())))
            .filter(|delivered| !delivered)
            .count()
    }
}
