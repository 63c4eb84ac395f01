//! Key-value store abstraction consumed by the binding engine.
//!
//! The engine only observes the store: it needs a ranged snapshot read, a
//! watch subscription over the same range and a connectivity check. Any
//! client exposing those three operations can back a [`crate::Client`].
//!
//! [`MemoryStore`] is an in-process versioned implementation, used for
//! embedding and for tests.

mod memory;
pub use memory::*;


use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Kind of mutation carried by an [`Event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Key was inserted or updated
    Put,
    /// Key was deleted
    Delete,
}

/// Key range selector for reads and watches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Match every key starting with the given key instead of the key alone
    pub prefix: bool,
    /// Watch only: first revision to deliver. Retained events from this
    /// revision on are replayed before live ones; `None` starts at the next
    /// mutation.
    pub start_revision: Option<u64>,
}

impl QueryOptions {
    /// Exact key match
    pub fn exact() -> Self {
        Self {
            prefix: false,
            start_revision: None,
        }
    }

    /// Prefix match
    pub fn prefix() -> Self {
        Self {
            prefix: true,
            start_revision: None,
        }
    }

    /// Same range, watched from `revision` on
    pub fn from_revision(
        self,
        revision: u64,
    ) -> Self {
        Self {
            start_revision: Some(revision),
            ..self
        }
    }

    /// Whether `candidate` lies in the range selected by `key` and these options
    pub fn matches(
        &self,
        key: &str,
        candidate: &str,
    ) -> bool {
        if self.prefix {
            candidate.starts_with(key)
        } else {
            candidate == key
        }
    }
}

/// One stored entry as returned by a snapshot read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Bytes,
    /// Store revision of the last modification of this key
    pub revision: u64,
}

/// Ranged read together with the store revision it observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Store revision at the time of the read; a watch from `revision + 1`
    /// misses no later mutation
    pub revision: u64,
    pub kvs: Vec<KeyValue>,
}

/// A mutation observed on a bound key or prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventType,
    pub key: String,
    /// The new value (empty for DELETE events)
    pub value: Bytes,
    pub revision: u64,
    /// Value before the mutation, when the store reports it
    pub prev_value: Option<Bytes>,
}

impl Event {
    /// Synthetic PUT replaying a snapshot entry through the pipeline
    pub fn snapshot(kv: KeyValue) -> Self {
        Self {
            kind: EventType::Put,
            key: kv.key,
            value: kv.value,
            revision: kv.revision,
            prev_value: None,
        }
    }

    pub fn put(
        key: impl Into<String>,
        value: impl Into<Bytes>,
        revision: u64,
    ) -> Self {
        Self {
            kind: EventType::Put,
            key: key.into(),
            value: value.into(),
            revision,
            prev_value: None,
        }
    }

    pub fn delete(
        key: impl Into<String>,
        revision: u64,
    ) -> Self {
        Self {
            kind: EventType::Delete,
            key: key.into(),
            value: Bytes::new(),
            revision,
            prev_value: None,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.kind == EventType::Delete
    }
}

/// Watch subscription; ends when the store closes it, yields `Err` on connection loss.
///
/// Dropping the stream releases the store-side watcher.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Operations the engine consumes from the remote key-value store.
///
/// # Thread Safety
///
/// Implementations are shared by every binding loop of a client and must be
/// `Send + Sync`.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Verifies that at least one endpoint answers.
    ///
    /// # Errors
    /// - [`crate::Error::Connection`] when no endpoint is reachable
    async fn health_check(&self) -> Result<()>;

    /// Reads every entry in the selected range, ordered as the store returns
    /// them, with the store revision the read observed.
    ///
    /// # Errors
    /// - [`crate::Error::StoreUnavailable`] when the store refuses the read
    /// - [`crate::Error::Connection`] when the store cannot be reached
    async fn get(
        &self,
        key: &str,
        options: QueryOptions,
    ) -> Result<Snapshot>;

    /// Opens a watch subscription over the selected range.
    ///
    /// With `options.start_revision` set, every mutation from that revision
    /// on is delivered, including ones committed before the call.
    /// The subscription is not restartable; resuming after closure requires a
    /// new call.
    ///
    /// # Errors
    /// - [`crate::Error::Compacted`] when the start revision is no longer retained
    async fn watch(
        &self,
        key: &str,
        options: QueryOptions,
    ) -> Result<EventStream>;
}
