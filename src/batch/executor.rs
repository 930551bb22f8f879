//! Batch executor.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, info, warn};

use super::command::BatchCommand;
use super::demux::{DemuxSummary, ResponseDemultiplexer};
use super::window::SealedWindow;
use crate::collapser::CollapserMetrics;
use crate::Error;

/// How the execution of one sealed window ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The window was empty; the command was not invoked.
    Discarded,
    /// Responses were routed to every slot.
    Completed {
        summary: DemuxSummary,
        used_fallback: bool,
        execution_time: Duration,
    },
    /// Fewer responses than requests; every slot got `ContractViolation`.
    ContractViolated {
        request_count: usize,
        response_count: usize,
    },
    /// The command failed; every slot got the same `BatchExecution` error.
    Failed,
}

/// Runs the batch command for sealed windows of one collapsing key.
pub struct BatchExecutor<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    key: Arc<str>,
    command: Arc<dyn BatchCommand<A, R>>,
    fallback_enabled: bool,
    demux: ResponseDemultiplexer,
    metrics: Arc<CollapserMetrics>,
}

impl<A, R> BatchExecutor<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(
        key: Arc<str>,
        command: Arc<dyn BatchCommand<A, R>>,
        fallback_enabled: bool,
        metrics: Arc<CollapserMetrics>,
    ) -> Self {
        Self {
            key,
            command,
            fallback_enabled,
            demux: ResponseDemultiplexer::new(),
            metrics,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fallback_enabled(&self) -> bool {
        self.fallback_enabled
    }

    /// Execute one sealed window and resolve all of its slots.
    ///
    /// The command is invoked exactly once for a non-empty window.
    pub async fn execute(&self, window: SealedWindow<A, R>) -> ExecutionOutcome {
        let window_id = window.id();
        let request_count = window.len();
        if request_count == 0 {
            self.metrics.record_discarded();
            debug!(collapser = %self.key, window = window_id, "discarding empty window");
            return ExecutionOutcome::Discarded;
        }

        let start = Instant::now();
        let (arguments, resolvers) = window.into_parts();
        self.metrics.record_batch(request_count);

        let mut used_fallback = false;
        let responses = match self.invoke(&arguments).await {
            Ok(responses) => responses,
            Err(cause) => {
                self.metrics.record_batch_failure();
                let failure = Error::batch_execution(self.key.as_ref(), cause);
                match self.fallback(&arguments).await {
                    Some(responses) => {
                        self.metrics.record_fallback();
                        warn!(
                            collapser = %self.key,
                            window = window_id,
                            error = %failure,
                            "batch failed, using fallback responses"
                        );
                        used_fallback = true;
                        responses
                    }
                    None => {
                        warn!(
                            collapser = %self.key,
                            window = window_id,
                            requests = request_count,
                            error = %failure,
                            "batch failed"
                        );
                        self.demux.broadcast(resolvers, &failure);
                        return ExecutionOutcome::Failed;
                    }
                }
            }
        };

        let response_count = responses.len();
        if response_count < request_count {
            self.metrics.record_contract_violation();
            let violation = Error::ContractViolation {
                key: self.key.to_string(),
                request_count,
                response_count,
            };
            warn!(
                collapser = %self.key,
                window = window_id,
                requests = request_count,
                responses = response_count,
                "batch response shorter than request list"
            );
            self.demux.broadcast(resolvers, &violation);
            return ExecutionOutcome::ContractViolated {
                request_count,
                response_count,
            };
        }

        let summary = self.demux.demux(resolvers, responses);
        self.metrics.record_demux(&summary);
        let execution_time = start.elapsed();
        info!(
            collapser = %self.key,
            window = window_id,
            requests = request_count,
            responses = response_count,
            absent = summary.absent,
            elapsed_ms = execution_time.as_millis() as u64,
            "batch completed"
        );
        ExecutionOutcome::Completed {
            summary,
            used_fallback,
            execution_time,
        }
    }

    async fn invoke(&self, arguments: &[A]) -> anyhow::Result<Vec<Option<R>>> {
        match AssertUnwindSafe(self.command.execute(arguments))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("batch command panicked")),
        }
    }

    async fn fallback(&self, arguments: &[A]) -> Option<Vec<Option<R>>> {
        if !self.fallback_enabled {
            return None;
        }
        AssertUnwindSafe(self.command.fallback(arguments))
            .catch_unwind()
            .await
            .unwrap_or(None)
    }
}
