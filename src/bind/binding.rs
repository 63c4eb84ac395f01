use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::BindContext;
use super::BindState;
use super::Pipeline;
use crate::store::Event;
use crate::store::QueryOptions;
use crate::Result;

/// Decoded values of a binding keyed by absolute store key
pub type ResultMap<T> = HashMap<String, Arc<T>>;

/// Target constructor producing the seed each PUT is decoded into
pub type TargetFn<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Identifies a binding within its client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub(crate) u64);

impl fmt::Display for BindingId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "binding-{}", self.0)
    }
}

/// State guarded by the binding mutex
pub(crate) struct Shared<T> {
    pub(crate) result: ResultMap<T>,
    pub(crate) last_event: Option<Event>,
}

/// Unit of synchronization between one key (or prefix) and its decoded values
pub(crate) struct Binding<T> {
    pub(crate) id: BindingId,
    pub(crate) key: String,
    pub(crate) options: QueryOptions,
    pipeline: Pipeline<T>,
    target: TargetFn<T>,
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> Binding<T> {
    pub(crate) fn new(
        id: BindingId,
        key: String,
        options: QueryOptions,
        target: TargetFn<T>,
        pipeline: Pipeline<T>,
    ) -> Self {
        Self {
            id,
            key,
            options,
            pipeline,
            target,
            shared: Arc::new(Mutex::new(Shared {
                result: HashMap::new(),
                last_event: None,
            })),
        }
    }

    /// Runs `event` through the pipeline under the binding mutex.
    ///
    /// The guard is dropped on every exit path, including handler failures.
    pub(crate) fn apply(
        &self,
        event: Event,
    ) -> Result<()> {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        shared.last_event = Some(event.clone());

        let mut ctx = BindContext {
            binding_key: &self.key,
            event: &event,
            target: &self.target,
            result: &mut shared.result,
        };
        let outcome = self.pipeline.run(&mut ctx);
        debug!(
            binding = %self.id,
            key = %event.key,
            kind = ?event.kind,
            revision = event.revision,
            ok = outcome.is_ok(),
            "Event applied"
        );
        outcome
    }

    pub(crate) fn shared(&self) -> Arc<Mutex<Shared<T>>> {
        self.shared.clone()
    }
}

/// Caller's view of a single-target binding
///
/// [`current()`](Self::current) always reflects the latest applied event.
/// After the key is deleted it returns `None` until the next PUT.
pub struct BindHandle<T> {
    id: BindingId,
    key: String,
    shared: Arc<Mutex<Shared<T>>>,
    status: watch::Receiver<BindState>,
}

impl<T> Clone for BindHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            key: self.key.clone(),
            shared: self.shared.clone(),
            status: self.status.clone(),
        }
    }
}

impl<T> fmt::Debug for BindHandle<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("BindHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl<T> BindHandle<T> {
    pub(crate) fn new(
        binding: &Binding<T>,
        status: watch::Receiver<BindState>,
    ) -> Self {
        Self {
            id: binding.id,
            key: binding.key.clone(),
            shared: binding.shared(),
            status,
        }
    }

    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Absolute store key of the binding
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Latest decoded value of the bound key
    pub fn current(&self) -> Option<Arc<T>> {
        self.shared.lock().result.get(&self.key).cloned()
    }

    /// Last event routed through the pipeline, successful or not
    pub fn last_event(&self) -> Option<Event> {
        self.shared.lock().last_event.clone()
    }

    /// Current loop state
    pub fn state(&self) -> BindState {
        self.status.borrow().clone()
    }

    /// Resolves once the snapshot has been applied and the watch is open,
    /// or with the final state if the loop stopped first.
    pub async fn wait_watching(&self) -> BindState {
        self.wait_for(|s| matches!(s, BindState::Watching) || s.is_stopped()).await
    }

    /// Resolves once the loop has terminated or been closed
    pub async fn wait_stopped(&self) -> BindState {
        self.wait_for(BindState::is_stopped).await
    }

    async fn wait_for(
        &self,
        condition: impl FnMut(&BindState) -> bool,
    ) -> BindState {
        let mut status = self.status.clone();
        let outcome = status.wait_for(condition).await.map(|state| state.clone());
        match outcome {
            Ok(state) => state,
            // The loop is gone; its last published state is final.
            Err(_) => self.status.borrow().clone(),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Mutex<Shared<T>>> {
        &self.shared
    }
}

/// Live result collection of a prefix binding
///
/// Grows on PUT and shrinks on DELETE as the watch progresses. Every read
/// takes the binding mutex, so it never observes a half-applied event.
pub struct MultiResult<T> {
    handle: BindHandle<T>,
}

impl<T> Clone for MultiResult<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl<T> fmt::Debug for MultiResult<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("MultiResult")
            .field("handle", &self.handle)
            .field("len", &self.len())
            .finish()
    }
}

impl<T> MultiResult<T> {
    pub(crate) fn new(handle: BindHandle<T>) -> Self {
        Self { handle }
    }

    /// Handle for state inspection and [`crate::Client::close`]
    pub fn handle(&self) -> &BindHandle<T> {
        &self.handle
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<Arc<T>> {
        self.handle.shared().lock().result.get(key).cloned()
    }

    pub fn contains_key(
        &self,
        key: &str,
    ) -> bool {
        self.handle.shared().lock().result.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handle.shared().lock().result.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted keys currently present
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handle.shared().lock().result.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Consistent copy of the whole collection
    pub fn snapshot(&self) -> ResultMap<T> {
        self.handle.shared().lock().result.clone()
    }

    /// Runs `f` against the live map while holding the binding mutex
    pub fn with<R>(
        &self,
        f: impl FnOnce(&ResultMap<T>) -> R,
    ) -> R {
        f(&self.handle.shared().lock().result)
    }
}
