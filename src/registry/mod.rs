//! Collapser registry: lookup from collapsing key to its live collapser.
//!
//! A [`CollapserRegistry`] is an explicit object shared by the call sites
//! that need it. Batch commands are injected per key when the registry is
//! built; collapsers are created lazily on first use. Global-scoped
//! collapsers live as long as the registry, request-scoped ones live in the
//! [`RequestContext`] they were created for.

mod context;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::debug;

use crate::batch::BatchCommand;
use crate::collapser::{CollapserConfig, RequestCollapser, Scope};
use crate::{Error, ErrorContext, Result};

pub use context::RequestContext;

/// Key name to collapser map with insert-if-absent semantics.
pub(crate) struct CollapserTable<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    entries: RwLock<HashMap<String, RequestCollapser<A, R>>>,
}

impl<A, R> CollapserTable<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<RequestCollapser<A, R>> {
        self.entries.read().ok()?.get(key).cloned()
    }

    /// Return the collapser for `key`, creating it with `create` if absent.
    ///
    /// Creation happens under the write lock, so concurrent first use yields
    /// exactly one instance.
    pub(crate) fn get_or_try_insert<F>(&self, key: &str, create: F) -> Result<RequestCollapser<A, R>>
    where
        F: FnOnce() -> Result<RequestCollapser<A, R>>,
    {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::poisoned("collapser_registry"))?;
        if let Some(existing) = entries.get(key) {
            return Ok(existing.clone());
        }
        let collapser = create()?;
        entries.insert(key.to_string(), collapser.clone());
        Ok(collapser)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn drain(&self) -> Vec<RequestCollapser<A, R>> {
        match self.entries.write() {
            Ok(mut entries) => entries.drain().map(|(_, c)| c).collect(),
            Err(poisoned) => poisoned.into_inner().drain().map(|(_, c)| c).collect(),
        }
    }
}

/// Registry of collapsers for one argument/response type pair.
pub struct CollapserRegistry<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    commands: RwLock<HashMap<String, Arc<dyn BatchCommand<A, R>>>>,
    global: CollapserTable<A, R>,
    default_key: String,
    runtime: Option<Handle>,
}

impl<A, R> CollapserRegistry<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            global: CollapserTable::new(),
            default_key: String::new(),
            runtime: None,
        }
    }

    /// Key used for configs that leave `collapser_key` empty.
    pub fn with_default_key(mut self, key: impl Into<String>) -> Self {
        self.default_key = key.into();
        self
    }

    /// Spawn timers and batches of every collapser created here on `runtime`.
    ///
    /// Without it, collapsers bind to the runtime current at creation, so
    /// lookups must then happen inside a tokio context.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Inject the batch command used by collapsers for `key`.
    pub fn with_command(self, key: impl Into<String>, command: Arc<dyn BatchCommand<A, R>>) -> Self {
        self.register_command(key, command);
        self
    }

    /// Inject or replace the batch command for `key`.
    ///
    /// Collapsers that already exist keep the command they were created with.
    pub fn register_command(&self, key: impl Into<String>, command: Arc<dyn BatchCommand<A, R>>) {
        match self.commands.write() {
            Ok(mut commands) => {
                commands.insert(key.into(), command);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key.into(), command);
            }
        }
    }

    pub fn has_command(&self, key: &str) -> bool {
        self.commands
            .read()
            .map(|c| c.contains_key(key))
            .unwrap_or(false)
    }

    /// Start a new request context for request-scoped collapsers.
    pub fn begin_context(&self) -> RequestContext<A, R> {
        RequestContext::new()
    }

    /// Return the collapser for `config`, creating it on first use.
    ///
    /// Global-scoped keys resolve against the registry, request-scoped keys
    /// against `context`, which is then required. Asking again for an
    /// existing key in the same scope returns the same collapser; the config
    /// of the first creation wins. An empty `collapser_key` falls back to the
    /// registry's default key.
    pub fn get_or_create(
        &self,
        config: &CollapserConfig,
        context: Option<&RequestContext<A, R>>,
    ) -> Result<RequestCollapser<A, R>> {
        self.get_or_create_or_default(config, &self.default_key, context)
    }

    /// Like [`get_or_create`](Self::get_or_create), with `default_key` standing
    /// in for an empty `collapser_key`. Typically the name of the call site, so
    /// repeated calls from it land on the same collapser.
    pub fn get_or_create_or_default(
        &self,
        config: &CollapserConfig,
        default_key: &str,
        context: Option<&RequestContext<A, R>>,
    ) -> Result<RequestCollapser<A, R>> {
        if config.collapser_key.is_empty() && default_key.is_empty() {
            return Err(Error::configuration_with_context(
                "no collapser key configured and no default key available",
                ErrorContext::new()
                    .with_field_path("collapser_key")
                    .with_source("collapser_registry"),
            ));
        }
        let resolved = config.resolve_key(default_key);
        let key = resolved.as_str();
        let table = match (config.scope, context) {
            (Scope::Global, _) => &self.global,
            (Scope::Request, Some(ctx)) => ctx.table(),
            (Scope::Request, None) => {
                return Err(Error::configuration_with_context(
                    format!("request-scoped collapser '{}' needs an active request context", key),
                    ErrorContext::new()
                        .with_field_path("scope")
                        .with_source("collapser_registry"),
                ));
            }
        };
        table.get_or_try_insert(key, || {
            let command = self.command(key)?;
            debug!(collapser = %key, scope = ?config.scope, "creating collapser");
            let config = CollapserConfig {
                collapser_key: resolved.clone(),
                ..config.clone()
            };
            match &self.runtime {
                Some(runtime) => RequestCollapser::with_runtime(config, command, runtime.clone()),
                None => RequestCollapser::new(config, command),
            }
        })
    }

    /// Convenience form of [`get_or_create`](Self::get_or_create) taking the settings directly.
    pub fn get_or_create_with(
        &self,
        key: &str,
        scope: Scope,
        window: Duration,
        max_batch_size: Option<usize>,
        context: Option<&RequestContext<A, R>>,
    ) -> Result<RequestCollapser<A, R>> {
        let mut config = CollapserConfig::new(key)
            .with_scope(scope)
            .with_window_duration(window);
        config.max_batch_size = max_batch_size;
        self.get_or_create(&config, context)
    }

    /// Global-scoped collapser for `key`, if one was created.
    pub fn get(&self, key: &str) -> Option<RequestCollapser<A, R>> {
        self.global.get(key)
    }

    /// Number of global-scoped collapsers.
    pub fn len(&self) -> usize {
        self.global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.global.keys()
    }

    /// Shut down every global-scoped collapser and forget it.
    pub async fn shutdown(&self) -> Result<()> {
        let collapsers = self.global.drain();
        let results =
            futures::future::join_all(collapsers.iter().map(|c| c.shutdown())).await;
        results.into_iter().collect()
    }

    fn command(&self, key: &str) -> Result<Arc<dyn BatchCommand<A, R>>> {
        let commands = self
            .commands
            .read()
            .map_err(|_| Error::poisoned("collapser_registry"))?;
        commands.get(key).cloned().ok_or_else(|| {
            Error::configuration_with_context(
                format!("no batch command registered for collapser '{}'", key),
                ErrorContext::new()
                    .with_field_path("collapser_key")
                    .with_source("collapser_registry"),
            )
        })
    }
}

impl<A, R> Default for CollapserRegistry<A, R>
where
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
