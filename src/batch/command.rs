//! The downstream batch capability.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// External batch operation invoked once per sealed window.
///
/// `execute` receives the window's arguments in position order and must
/// return at least as many entries, aligned by position. A `None` entry means
/// "no value for this request" and is delivered to its caller as such.
#[async_trait]
pub trait BatchCommand<A, R>: Send + Sync
where
    A: Send + Sync,
    R: Send,
{
    async fn execute(&self, arguments: &[A]) -> anyhow::Result<Vec<Option<R>>>;

    /// Substitute responses used when `execute` fails and fallback is enabled.
    async fn fallback(&self, _arguments: &[A]) -> Option<Vec<Option<R>>> {
        None
    }
}

/// Adapts an async closure over the owned argument list into a [`BatchCommand`].
pub struct BatchFn<A, F> {
    f: F,
    _marker: PhantomData<fn(A)>,
}

impl<A, F> BatchFn<A, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<A, R, F, Fut> BatchCommand<A, R> for BatchFn<A, F>
where
    A: Clone + Send + Sync,
    R: Send,
    F: Fn(Vec<A>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<Option<R>>>> + Send,
{
    async fn execute(&self, arguments: &[A]) -> anyhow::Result<Vec<Option<R>>> {
        (self.f)(arguments.to_vec()).await
    }
}

/// Shorthand for [`BatchFn::new`].
pub fn batch_fn<A, R, F, Fut>(f: F) -> BatchFn<A, F>
where
    F: Fn(Vec<A>) -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<Option<R>>>>,
{
    BatchFn::new(f)
}
