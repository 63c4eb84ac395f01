//! Client owning the store connection and every active binding.
//!
//! # Basic Usage
//! ```no_run
//! use std::sync::Arc;
//!
//! use bindwatch::{json_handler, Client, MemoryStore, Pipeline, QueryOptions, Settings};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Student {
//!     #[serde(default)]
//!     name: String,
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::default());
//!     let settings = Settings::default().with_store_url("etcd://127.0.0.1:2379/pub/pjoc").unwrap();
//!     let client = Client::builder(settings).build(store).await.unwrap();
//!
//!     let students = client
//!         .bind_multi(Student::default, "go_test", QueryOptions::prefix(), Pipeline::new().then(json_handler()))
//!         .unwrap();
//!     students.handle().wait_watching().await;
//!     println!("students: {:?}", students.keys());
//!
//!     client.shutdown().await;
//! }
//! ```

mod builder;
pub use builder::*;


use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::bind::BindHandle;
use crate::bind::BindState;
use crate::bind::Binding;
use crate::bind::BindingId;
use crate::bind::FieldDiff;
use crate::bind::MultiResult;
use crate::bind::Pipeline;
use crate::bind::WatchLoop;
use crate::diff::FieldChange;
use crate::diff::ListenerId;
use crate::diff::ListenerRegistry;
use crate::key::resolve_key;
use crate::store::KvStore;
use crate::store::QueryOptions;
use crate::Error;
use crate::Result;
use crate::Settings;

struct BindingTask {
    key: String,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

struct ClientInner {
    settings: Settings,
    store: Arc<dyn KvStore>,
    bindings: DashMap<BindingId, BindingTask>,
    next_id: AtomicU64,
    listeners: Arc<ListenerRegistry>,
    /// Parent of every binding token
    shutdown: CancellationToken,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Entry point of the binding engine
///
/// Cheap to clone; clones share bindings and listeners. Dropping the last
/// clone cancels every watch loop.
///
/// Created through the [`builder()`](Client::builder) method
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("store", &self.inner.settings.store)
            .field("bindings", &self.inner.bindings.len())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a configured client builder
    pub fn builder(settings: Settings) -> ClientBuilder {
        ClientBuilder::new(settings)
    }

    pub(crate) fn new(
        settings: Settings,
        store: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                settings,
                store,
                bindings: DashMap::new(),
                next_id: AtomicU64::new(1),
                listeners: Arc::new(ListenerRegistry::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Absolute store key of `subpath` under the configured root
    pub fn resolve_key(
        &self,
        subpath: &str,
    ) -> String {
        resolve_key(&self.inner.settings.store.root, subpath)
    }

    /// Binds one key to a single target.
    ///
    /// The returned handle dereferences to the latest decoded value.
    ///
    /// # Errors
    /// - [`Error::InvalidBinding`] for a prefix `options`, an empty pipeline,
    ///   or when called outside a tokio runtime
    pub fn bind<T, F>(
        &self,
        target: F,
        subpath: &str,
        options: QueryOptions,
        pipeline: Pipeline<T>,
    ) -> Result<BindHandle<T>>
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        if options.prefix {
            return Err(Error::InvalidBinding(
                "a single-target binding cannot use prefix options, use bind_multi".into(),
            ));
        }
        self.spawn_binding(Arc::new(target), subpath, options, pipeline)
    }

    /// Binds every key of a prefix (or a single key) to its own target
    /// instance and returns the live result collection.
    ///
    /// # Errors
    /// - [`Error::InvalidBinding`] for an empty pipeline or outside a tokio runtime
    pub fn bind_multi<T, F>(
        &self,
        target: F,
        subpath: &str,
        options: QueryOptions,
        pipeline: Pipeline<T>,
    ) -> Result<MultiResult<T>>
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.spawn_binding(Arc::new(target), subpath, options, pipeline)
            .map(MultiResult::new)
    }

    /// Registers a listener invoked with every change at or under `path`
    /// observed by a [`FieldDiff`] stage of this client.
    ///
    /// Listeners run on the watch loop while it holds the binding mutex.
    /// Calling [`BindHandle::current`] or any [`MultiResult`] read of the
    /// same binding from inside the listener deadlocks; take the values
    /// from the [`FieldChange`] instead, or hand the work to another task.
    pub fn register_field_listener<F>(
        &self,
        path: &str,
        callback: F,
    ) -> Result<ListenerId>
    where
        F: Fn(&FieldChange) + Send + Sync + 'static,
    {
        self.inner.listeners.register(path, callback)
    }

    pub fn unregister_field_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.inner.listeners.unregister(id)
    }

    /// The client's listener registry, shared by all of its bindings
    pub fn listeners(&self) -> Arc<ListenerRegistry> {
        self.inner.listeners.clone()
    }

    /// Wraps `inner` in a stage reporting field changes to this client's listeners
    pub fn field_diff<H>(
        &self,
        inner: H,
    ) -> FieldDiff<H> {
        FieldDiff::new(inner, self.listeners())
    }

    /// Tears down a binding's watch loop and releases its store watcher.
    ///
    /// Waits for an in-flight event to finish applying.
    ///
    /// # Errors
    /// - [`Error::InvalidBinding`] if the binding is unknown or already closed
    pub async fn close(
        &self,
        id: BindingId,
    ) -> Result<()> {
        let (_, task) = self
            .inner
            .bindings
            .remove(&id)
            .ok_or_else(|| Error::InvalidBinding(format!("{id} is not open")))?;

        task.cancel.cancel();
        if let Err(e) = task.join.await {
            warn!(binding = %id, key = %task.key, "Watch loop task failed: {}", e);
        }
        debug!(binding = %id, key = %task.key, "Binding released");
        Ok(())
    }

    /// Closes every binding
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let ids: Vec<BindingId> = self.inner.bindings.iter().map(|t| *t.key()).collect();
        for id in ids {
            if let Err(e) = self.close(id).await {
                debug!(binding = %id, "Binding already released: {}", e);
            }
        }
    }

    /// Number of bindings not yet closed, including terminated ones
    pub fn binding_count(&self) -> usize {
        self.inner.bindings.len()
    }

    fn spawn_binding<T>(
        &self,
        target: Arc<dyn Fn() -> T + Send + Sync>,
        subpath: &str,
        options: QueryOptions,
        pipeline: Pipeline<T>,
    ) -> Result<BindHandle<T>>
    where
        T: Send + Sync + 'static,
    {
        if pipeline.is_empty() {
            return Err(Error::InvalidBinding("pipeline requires at least one handler".into()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::InvalidBinding(format!("bindings require a tokio runtime: {e}")))?;

        let key = self.resolve_key(subpath);
        let id = BindingId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let binding = Arc::new(Binding::new(id, key.clone(), options, target, pipeline));

        let (status_tx, status_rx) = watch::channel(BindState::Created);
        let handle = BindHandle::new(&binding, status_rx);
        let cancel = self.inner.shutdown.child_token();

        let watch_loop = WatchLoop {
            binding,
            store: self.inner.store.clone(),
            request_timeout: self.inner.settings.store.timeout(),
            cancel: cancel.clone(),
            status: status_tx,
            trace_events: self.inner.settings.watch.trace_events,
        };
        let join = runtime.spawn(watch_loop.run());

        debug!(binding = %id, key = %key, prefix = options.prefix, "Binding created");
        self.inner.bindings.insert(id, BindingTask { key, cancel, join });
        Ok(handle)
    }
}
