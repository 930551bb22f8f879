//! Per-key collapser: owns the open window and hands sealed windows to execution.

use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::config::{CollapserConfig, CollapsingKey, Scope};
use super::metrics::{CollapserMetrics, MetricsSnapshot};
use crate::batch::{BatchCommand, BatchExecutor, RequestWindow, ResponseHandle, SealTrigger, SealedWindow};
use crate::{Error, ErrorContext, Result};

struct State<A, R> {
    open: Option<RequestWindow<A, R>>,
    next_window_id: u64,
    closed: bool,
}

struct Inner<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    key: Arc<str>,
    scope: Scope,
    config: CollapserConfig,
    state: Mutex<State<A, R>>,
    executor: Arc<BatchExecutor<A, R>>,
    metrics: Arc<CollapserMetrics>,
    tracker: TaskTracker,
    runtime: Handle,
}

/// Collapses requests for one key into windows executed as single batches.
///
/// Cloning is cheap and every clone drives the same windows.
pub struct RequestCollapser<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    inner: Arc<Inner<A, R>>,
}

impl<A, R> Clone for RequestCollapser<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, R> RequestCollapser<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Create a collapser on the current tokio runtime.
    pub fn new(config: CollapserConfig, command: Arc<dyn BatchCommand<A, R>>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            Error::runtime_with_context(
                "a request collapser must be created inside a tokio runtime",
                ErrorContext::new().with_source("collapser"),
            )
        })?;
        Self::with_runtime(config, command, runtime)
    }

    /// Create a collapser that spawns timers and batch executions on `runtime`.
    ///
    /// Submissions may then come from any thread, async or not.
    pub fn with_runtime(
        config: CollapserConfig,
        command: Arc<dyn BatchCommand<A, R>>,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let key: Arc<str> = Arc::from(config.resolve_key(""));
        let metrics = Arc::new(CollapserMetrics::new());
        let executor = Arc::new(BatchExecutor::new(
            Arc::clone(&key),
            command,
            config.fallback_enabled,
            Arc::clone(&metrics),
        ));
        debug!(
            collapser = %key,
            scope = ?config.scope,
            window_ms = config.window_duration_ms,
            max_batch_size = ?config.max_batch_size,
            "collapser created"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                key,
                scope: config.scope,
                config,
                state: Mutex::new(State {
                    open: None,
                    next_window_id: 0,
                    closed: false,
                }),
                executor,
                metrics,
                tracker: TaskTracker::new(),
                runtime,
            }),
        })
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn collapsing_key(&self) -> CollapsingKey {
        CollapsingKey::new(self.inner.key.as_ref(), self.inner.scope)
    }

    pub fn config(&self) -> &CollapserConfig {
        &self.inner.config
    }

    /// Add a request to the open window and return a handle to its result.
    ///
    /// Opens a window (and starts its deadline timer) if none is open. When
    /// the append fills the window it is sealed and handed off before this
    /// returns. Never waits on batch execution.
    pub fn submit(&self, argument: A) -> Result<ResponseHandle<R>> {
        let inner = &self.inner;
        let (handle, sealed) = {
            let mut state = inner.state.lock().map_err(|_| Error::poisoned("collapser"))?;
            if state.closed {
                return Err(Error::Shutdown {
                    key: inner.key.to_string(),
                });
            }
            if state.open.is_none() {
                state.next_window_id += 1;
            }
            let id = state.next_window_id;
            let window = state.open.get_or_insert_with(|| inner.open_window(id));
            let (handle, appended) = window.append(argument);
            let sealed = if appended.should_seal() {
                state.open.take().map(|w| w.seal(SealTrigger::Size))
            } else {
                None
            };
            (handle, sealed)
        };
        inner.metrics.record_submitted();
        if let Some(window) = sealed {
            inner.dispatch(window);
        }
        Ok(handle)
    }

    /// Submit and wait for the result.
    pub async fn execute(&self, argument: A) -> Result<Option<R>> {
        self.submit(argument)?.await
    }

    /// Seal the open window now, if there is one. Returns whether a window was sealed.
    pub fn flush(&self) -> Result<bool> {
        let sealed = {
            let mut state = self
                .inner
                .state
                .lock()
                .map_err(|_| Error::poisoned("collapser"))?;
            state.open.take().map(|w| w.seal(SealTrigger::Flush))
        };
        Ok(match sealed {
            Some(window) => {
                self.inner.dispatch(window);
                true
            }
            None => false,
        })
    }

    /// Stop accepting requests and seal the open window without waiting for
    /// its batch. Later submissions fail with [`Error::Shutdown`].
    pub fn close(&self) -> Result<bool> {
        let sealed = {
            let mut state = self
                .inner
                .state
                .lock()
                .map_err(|_| Error::poisoned("collapser"))?;
            state.closed = true;
            state.open.take().map(|w| w.seal(SealTrigger::Flush))
        };
        self.inner.tracker.close();
        Ok(match sealed {
            Some(window) => {
                self.inner.dispatch(window);
                true
            }
            None => false,
        })
    }

    /// Stop accepting requests, seal the open window and wait until every
    /// in-flight batch has resolved its slots.
    pub async fn shutdown(&self) -> Result<()> {
        self.close()?;
        self.inner.tracker.wait().await;
        debug!(collapser = %self.inner.key, "collapser shut down");
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    /// Number of requests waiting in the open window.
    pub fn pending(&self) -> usize {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|s| s.open.as_ref().map(RequestWindow::len))
            .unwrap_or(0)
    }

    /// Number of sealed windows still executing.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl<A, R> Inner<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    // Called with the state lock held.
    fn open_window(self: &Arc<Self>, id: u64) -> RequestWindow<A, R> {
        let mut window = RequestWindow::new(
            id,
            Arc::clone(&self.key),
            self.config.window_duration(),
            self.config.max_batch_size,
        );
        let deadline = window.deadline();
        let inner = Arc::clone(self);
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            inner.seal_expired(id);
        });
        window.set_timer(timer.abort_handle());
        debug!(collapser = %self.key, window = id, "window opened");
        window
    }

    fn seal_expired(&self, id: u64) {
        let sealed = match self.state.lock() {
            Ok(mut state) => {
                let current = state.open.as_ref().map_or(false, |w| w.id() == id);
                if current {
                    state.open.take().map(|w| w.seal(SealTrigger::Timer))
                } else {
                    None
                }
            }
            Err(_) => {
                warn!(collapser = %self.key, window = id, "collapser state poisoned, window not sealed");
                None
            }
        };
        if let Some(window) = sealed {
            self.dispatch(window);
        }
    }

    fn dispatch(&self, window: SealedWindow<A, R>) {
        self.metrics.record_sealed(window.trigger());
        debug!(
            collapser = %self.key,
            window = window.id(),
            requests = window.len(),
            trigger = %window.trigger(),
            "window sealed"
        );
        if window.is_empty() {
            self.metrics.record_discarded();
            return;
        }
        let executor = Arc::clone(&self.executor);
        self.tracker.spawn_on(
            async move {
                executor.execute(window).await;
            },
            &self.runtime,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::batch_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Calls = Arc<Mutex<Vec<Vec<String>>>>;

    fn echo(calls: Calls) -> Arc<dyn BatchCommand<String, String>> {
        Arc::new(batch_fn(move |args: Vec<String>| {
            let calls = Arc::clone(&calls);
            async move {
                calls.lock().unwrap().push(args.clone());
                Ok(args.into_iter().map(|a| Some(format!("r{}", a))).collect::<Vec<_>>())
            }
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger_seals_immediately() {
        let calls: Calls = Arc::default();
        let config = CollapserConfig::new("K")
            .with_window_duration_ms(50)
            .with_max_batch_size(3);
        let collapser = RequestCollapser::new(config, echo(Arc::clone(&calls))).unwrap();

        let handles: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|a| collapser.submit(a.to_string()).unwrap())
            .collect();
        assert_eq!(collapser.pending(), 0);

        let mut got = Vec::new();
        for h in handles {
            got.push(h.await.unwrap().unwrap());
        }
        assert_eq!(got, vec!["rA", "rB", "rC"]);
        assert_eq!(*calls.lock().unwrap(), vec![vec!["A", "B", "C"]]);
        let snap = collapser.metrics();
        assert_eq!(snap.sealed_by_size, 1);
        assert_eq!(snap.sealed_by_timer, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_seals_partial_window() {
        let calls: Calls = Arc::default();
        let config = CollapserConfig::new("K").with_window_duration_ms(50);
        let collapser = RequestCollapser::new(config, echo(Arc::clone(&calls))).unwrap();

        let start = tokio::time::Instant::now();
        let handle = collapser.submit("A".to_string()).unwrap();
        assert_eq!(collapser.pending(), 1);
        assert_eq!(handle.await.unwrap(), Some("rA".to_string()));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(collapser.metrics().sealed_by_timer, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_seal_starts_new_window() {
        let calls: Calls = Arc::default();
        let config = CollapserConfig::new("K")
            .with_window_duration_ms(50)
            .with_max_batch_size(2);
        let collapser = RequestCollapser::new(config, echo(Arc::clone(&calls))).unwrap();

        let handles: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|a| collapser.submit(a.to_string()).unwrap())
            .collect();
        assert_eq!(collapser.pending(), 1);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(
            *calls.lock().unwrap(),
            vec![vec!["A".to_string(), "B".to_string()], vec!["C".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_flush_and_shutdown() {
        let calls: Calls = Arc::default();
        let config = CollapserConfig::new("K").with_window_duration_ms(60_000);
        let collapser = RequestCollapser::new(config, echo(Arc::clone(&calls))).unwrap();

        assert!(!collapser.flush().unwrap());
        let handle = collapser.submit("A".to_string()).unwrap();
        collapser.shutdown().await.unwrap();
        assert!(collapser.is_shutdown());
        assert_eq!(handle.await.unwrap(), Some("rA".to_string()));
        assert_eq!(collapser.metrics().sealed_by_flush, 1);

        let err = collapser.submit("B".to_string()).unwrap_err();
        assert!(matches!(err, Error::Shutdown { .. }));
    }

    #[tokio::test]
    async fn test_close_seals_and_refuses_submissions() {
        let calls: Calls = Arc::default();
        let config = CollapserConfig::new("K").with_window_duration_ms(60_000);
        let collapser = RequestCollapser::new(config, echo(Arc::clone(&calls))).unwrap();
        let other = collapser.clone();

        let handle = collapser.submit("A".to_string()).unwrap();
        assert!(collapser.close().unwrap());
        assert!(other.is_shutdown());
        assert_eq!(other.pending(), 0);
        assert!(matches!(other.submit("B".to_string()), Err(Error::Shutdown { .. })));

        assert_eq!(handle.await.unwrap(), Some("rA".to_string()));
        assert!(!collapser.close().unwrap());
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_does_not_affect_others() {
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&executed);
        let command: Arc<dyn BatchCommand<u32, u32>> = Arc::new(batch_fn(move |args: Vec<u32>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(args.len(), Ordering::SeqCst);
                Ok(args.into_iter().map(|a| Some(a + 1)).collect::<Vec<_>>())
            }
        }));
        let collapser =
            RequestCollapser::new(CollapserConfig::new("K").with_window_duration_ms(50), command)
                .unwrap();

        let impatient = collapser.submit(1).unwrap();
        let patient = collapser.submit(2).unwrap();
        let err = impatient
            .wait_timeout(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(patient.await.unwrap(), Some(3));
        assert_eq!(executed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let calls: Calls = Arc::default();
        let result = RequestCollapser::new(CollapserConfig::new("K"), echo(calls));
        assert!(matches!(result, Err(Error::Runtime { .. })));
    }

    #[test]
    fn test_submit_from_plain_threads() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let calls: Calls = Arc::default();
        let config = CollapserConfig::new("K")
            .with_window_duration_ms(5_000)
            .with_max_batch_size(8);
        let collapser =
            RequestCollapser::with_runtime(config, echo(Arc::clone(&calls)), rt.handle().clone())
                .unwrap();

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let c = collapser.clone();
                std::thread::spawn(move || c.submit(i.to_string()).unwrap().blocking_wait())
            })
            .collect();
        for t in threads {
            let value = t.join().unwrap().unwrap().unwrap();
            assert!(value.starts_with('r'));
        }
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 8);
    }
}
