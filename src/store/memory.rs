//! In-process versioned key-value store with prefix watches.
//!
//! # Architecture
//!
//! ```text
//! put()/delete():
//!   data.write() -> bump revision -> mutate -> notify matching watchers
//!                                               ↓ try_send
//! MemoryWatchStream (per watch() call):
//!   ReceiverStream -> binding loop
//! ```
//!
//! Watchers are notified while the data lock is held, so every watcher sees
//! mutations in revision order. A watcher whose buffer is full is cancelled
//! with a connection error instead of silently losing events; its binding
//! then terminates and can be recreated from a fresh snapshot.
//!
//! The last `history_size` mutations are retained. A watch with a start
//! revision replays the retained events from that revision before any live
//! one, so a snapshot read followed by a watch from `revision + 1` sees every
//! mutation exactly once.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use bytes::Bytes;
use dashmap::DashMap;
use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::Event;
use super::EventStream;
use super::EventType;
use super::KeyValue;
use super::KvStore;
use super::QueryOptions;
use super::Snapshot;
use crate::config::WatchConfig;
use crate::Error;
use crate::Result;

#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    mod_revision: u64,
}

/// Internal watcher state
#[derive(Debug)]
struct Watcher {
    key: String,
    options: QueryOptions,
    sender: mpsc::Sender<Result<Event>>,
}

/// Entries and retained history, guarded together so replay and live
/// dispatch cannot interleave
#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, StoredValue>,
    history: VecDeque<Event>,
}

#[derive(Debug)]
struct MemoryStoreInner {
    data: RwLock<State>,
    revision: AtomicU64,
    watchers: DashMap<u64, Watcher>,
    next_watcher_id: AtomicU64,
    available: AtomicBool,
    buffer_size: usize,
    history_size: usize,
}

/// Versioned in-memory store implementing [`KvStore`]
///
/// Cheap to clone; clones share the same data and watchers.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&WatchConfig::default())
    }
}

impl MemoryStore {
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            inner: Arc::new(MemoryStoreInner {
                data: RwLock::new(State::default()),
                revision: AtomicU64::new(0),
                watchers: DashMap::new(),
                next_watcher_id: AtomicU64::new(1),
                available: AtomicBool::new(true),
                buffer_size: config.watcher_buffer_size.max(1),
                history_size: config.history_size,
            }),
        }
    }

    /// Stores `value` under `key` and returns the new store revision.
    pub fn put(
        &self,
        key: impl Into<String>,
        value: impl Into<Bytes>,
    ) -> u64 {
        let key = key.into();
        let value = value.into();

        let mut data = self.inner.data.write();
        let revision = self.inner.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let prev = data.entries.insert(
            key.clone(),
            StoredValue {
                value: value.clone(),
                mod_revision: revision,
            },
        );

        let event = Event {
            kind: EventType::Put,
            key,
            value,
            revision,
            prev_value: prev.map(|p| p.value),
        };
        self.record(&mut data, event);
        revision
    }

    /// Deletes `key`. Returns the new revision, or `None` if the key was absent.
    pub fn delete(
        &self,
        key: &str,
    ) -> Option<u64> {
        let mut data = self.inner.data.write();
        let prev = data.entries.remove(key)?;
        let revision = self.inner.revision.fetch_add(1, Ordering::SeqCst) + 1;

        let event = Event {
            kind: EventType::Delete,
            key: key.to_string(),
            value: Bytes::new(),
            revision,
            prev_value: Some(prev.value),
        };
        self.record(&mut data, event);
        Some(revision)
    }

    /// Current store revision
    pub fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::SeqCst)
    }

    /// Marks the store unreachable; open watches receive a connection error and end.
    pub fn disconnect(&self) {
        self.inner.available.store(false, Ordering::SeqCst);
        let ids: Vec<u64> = self.inner.watchers.iter().map(|w| *w.key()).collect();
        for id in ids {
            if let Some((_, watcher)) = self.inner.watchers.remove(&id) {
                let _ = watcher
                    .sender
                    .try_send(Err(Error::Connection("store connection lost".to_string())));
            }
        }
        debug!("Memory store disconnected");
    }

    /// Makes the store reachable again. Watches closed by `disconnect` stay closed.
    pub fn reconnect(&self) {
        self.inner.available.store(true, Ordering::SeqCst);
    }

    /// Ends every open watch stream without an error
    pub fn close_watchers(&self) {
        self.inner.watchers.clear();
    }

    /// Number of open watch subscriptions
    ///
    /// This is primarily for testing and monitoring purposes.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }

    /// Retained events from `start` on in the watched range
    fn retained_since(
        &self,
        state: &State,
        start: u64,
        key: &str,
        options: QueryOptions,
    ) -> Result<Vec<Event>> {
        let current = self.inner.revision.load(Ordering::SeqCst);
        let oldest = state.history.front().map(|e| e.revision).unwrap_or(current + 1);
        if start < oldest && start <= current {
            return Err(Error::Compacted {
                requested: start,
                oldest,
            });
        }

        Ok(state
            .history
            .iter()
            .filter(|e| e.revision >= start && options.matches(key, &e.key))
            .cloned()
            .collect())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("memory store is disconnected".to_string()))
        }
    }

    /// Retains `event` and dispatches it; takes the write-locked state to keep
    /// revision order.
    fn record(
        &self,
        state: &mut State,
        event: Event,
    ) {
        if self.inner.history_size > 0 {
            if state.history.len() == self.inner.history_size {
                state.history.pop_front();
            }
            state.history.push_back(event.clone());
        }
        self.dispatch(event);
    }

    fn dispatch(
        &self,
        event: Event,
    ) {
        let mut lagging = Vec::new();
        for watcher in self.inner.watchers.iter() {
            if !watcher.options.matches(&watcher.key, &event.key) {
                continue;
            }
            if watcher.options.start_revision.is_some_and(|start| event.revision < start) {
                continue;
            }
            match watcher.sender.try_send(Ok(event.clone())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => lagging.push(*watcher.key()),
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        for id in lagging {
            // Dropping the sender ends the stream once the buffered events are drained.
            if let Some((_, watcher)) = self.inner.watchers.remove(&id) {
                warn!(watcher_id = id, key = %watcher.key, "Watcher lagging behind, cancelled");
            }
        }

        trace!(
            key = %event.key,
            kind = ?event.kind,
            revision = event.revision,
            "Event dispatched"
        );
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn health_check(&self) -> Result<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Connection("memory store is disconnected".to_string()))
        }
    }

    async fn get(
        &self,
        key: &str,
        options: QueryOptions,
    ) -> Result<Snapshot> {
        self.ensure_available()?;
        let data = self.inner.data.read();
        let revision = self.inner.revision.load(Ordering::SeqCst);

        let to_kv = |(k, v): (&String, &StoredValue)| KeyValue {
            key: k.clone(),
            value: v.value.clone(),
            revision: v.mod_revision,
        };

        let kvs = if options.prefix {
            data.entries
                .range(key.to_string()..)
                .take_while(|(k, _)| k.starts_with(key))
                .map(to_kv)
                .collect()
        } else {
            data.entries.get_key_value(key).map(to_kv).into_iter().collect()
        };
        Ok(Snapshot { revision, kvs })
    }

    async fn watch(
        &self,
        key: &str,
        options: QueryOptions,
    ) -> Result<EventStream> {
        self.ensure_available()?;

        // Replay and registration happen under the read lock so no mutation
        // slips between them.
        let data = self.inner.data.read();
        let replay = match options.start_revision {
            Some(start) => self.retained_since(&data, start, key, options)?,
            None => Vec::new(),
        };

        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.buffer_size + replay.len());
        for event in replay {
            // Capacity covers the whole replay.
            let _ = sender.try_send(Ok(event));
        }
        self.inner.watchers.insert(
            id,
            Watcher {
                key: key.to_string(),
                options,
                sender,
            },
        );

        trace!(watcher_id = id, key = %key, prefix = options.prefix, "Watcher registered");

        Ok(Box::pin(MemoryWatchStream {
            receiver: ReceiverStream::new(receiver),
            _guard: WatcherGuard {
                id,
                inner: self.inner.clone(),
            },
        }))
    }
}

/// Unregisters the watcher when the stream is dropped
struct WatcherGuard {
    id: u64,
    inner: Arc<MemoryStoreInner>,
}

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        self.inner.watchers.remove(&self.id);
        trace!(watcher_id = self.id, "Watcher unregistered");
    }
}

struct MemoryWatchStream {
    receiver: ReceiverStream<Result<Event>>,
    _guard: WatcherGuard,
}

impl Stream for MemoryWatchStream {
    type Item = Result<Event>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}
