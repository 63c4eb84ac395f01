//! Snapshot + watch driver of one binding.
//!
//! ```text
//! Created -> Snapshotting -> Watching -> Terminated(error) | Closed
//! ```
//!
//! The loop reads the current range once, replays it as synthetic PUTs,
//! then opens a watch over the same range starting right after the
//! snapshot revision and applies events in delivery order. Mutations
//! committed between the read and the watch are therefore not lost. Per-event failures are logged and counted; connection loss, the
//! store ending the stream, or a fatal handler error stop the loop. It never
//! restarts on its own.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::Binding;
use crate::metrics::ACTIVE_BINDINGS;
use crate::metrics::DECODE_FAILURES;
use crate::metrics::DELETED_KEYS;
use crate::metrics::EVENTS_APPLIED;
use crate::metrics::LOOP_TERMINATIONS;
use crate::store::Event;
use crate::store::KvStore;
use crate::Error;

/// Lifecycle of a binding's watch loop
#[derive(Debug, Clone)]
pub enum BindState {
    Created,
    Snapshotting,
    Watching,
    /// Stopped by a fatal error; the binding must be recreated to resume
    Terminated(Error),
    /// Stopped by the owning client
    Closed,
}

impl BindState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, BindState::Terminated(_) | BindState::Closed)
    }
}

impl PartialEq for BindState {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        match (self, other) {
            (BindState::Terminated(a), BindState::Terminated(b)) => a.to_string() == b.to_string(),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

pub(crate) struct WatchLoop<T> {
    pub(crate) binding: Arc<Binding<T>>,
    pub(crate) store: Arc<dyn KvStore>,
    /// Bound on the snapshot read and on opening the watch
    pub(crate) request_timeout: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) status: watch::Sender<BindState>,
    pub(crate) trace_events: bool,
}

enum Exit {
    Closed,
    Fatal(Error),
}

impl<T> WatchLoop<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) async fn run(self) {
        ACTIVE_BINDINGS.inc();
        let exit = self.drive().await;
        ACTIVE_BINDINGS.dec();

        let id = self.binding.id;
        let final_state = match exit {
            Exit::Closed => {
                info!(binding = %id, key = %self.binding.key, "Binding closed");
                LOOP_TERMINATIONS.with_label_values(&["closed"]).inc();
                BindState::Closed
            }
            Exit::Fatal(e) => {
                error!(binding = %id, key = %self.binding.key, "Binding terminated: {}", e);
                LOOP_TERMINATIONS.with_label_values(&["fatal"]).inc();
                BindState::Terminated(e)
            }
        };
        self.status.send_replace(final_state);
    }

    async fn drive(&self) -> Exit {
        let binding = &self.binding;
        let key = binding.key.as_str();
        let options = binding.options;

        // 1. Snapshot
        self.status.send_replace(BindState::Snapshotting);
        let snapshot = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Exit::Closed,
            read = tokio::time::timeout(self.request_timeout, self.store.get(key, options)) => read,
        };
        let snapshot = match snapshot {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return Exit::Fatal(e),
            Err(_) => return Exit::Fatal(Error::Timeout(self.request_timeout)),
        };
        debug!(
            binding = %binding.id,
            key = %key,
            entries = snapshot.kvs.len(),
            revision = snapshot.revision,
            "Snapshot read"
        );

        let watch_options = options.from_revision(snapshot.revision + 1);
        for kv in snapshot.kvs {
            if let Some(e) = self.apply(Event::snapshot(kv)) {
                return Exit::Fatal(e);
            }
        }

        // 2. Watch
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Exit::Closed,
            opened = tokio::time::timeout(self.request_timeout, self.store.watch(key, watch_options)) => opened,
        };
        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Exit::Fatal(e),
            Err(_) => return Exit::Fatal(Error::Timeout(self.request_timeout)),
        };
        self.status.send_replace(BindState::Watching);
        debug!(binding = %binding.id, key = %key, prefix = options.prefix, "Watch opened");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Exit::Closed,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    if let Some(e) = self.apply(event) {
                        return Exit::Fatal(e);
                    }
                }
                Some(Err(e)) => return Exit::Fatal(e),
                None => {
                    return Exit::Fatal(Error::Connection(format!("watch stream on {key} closed by store")))
                }
            }
        }
    }

    /// Applies one event; returns the error only if it is fatal to the loop
    fn apply(
        &self,
        event: Event,
    ) -> Option<Error> {
        let id = self.binding.id;
        let label = [self.binding.key.as_str()];
        if self.trace_events {
            debug!(
                binding = %id,
                key = %event.key,
                kind = ?event.kind,
                revision = event.revision,
                value = %String::from_utf8_lossy(&event.value),
                "Applying event"
            );
        }

        match self.binding.apply(event) {
            Ok(()) => {
                EVENTS_APPLIED.with_label_values(&label).inc();
                None
            }
            Err(Error::DeletedKey { key }) => {
                EVENTS_APPLIED.with_label_values(&label).inc();
                DELETED_KEYS.with_label_values(&label).inc();
                info!(binding = %id, key = %key, "Key is deleted");
                None
            }
            Err(e) if e.is_fatal() => Some(e),
            Err(e @ Error::Decode { .. }) => {
                DECODE_FAILURES.with_label_values(&label).inc();
                warn!(binding = %id, "Event skipped: {}", e);
                None
            }
            Err(e) => {
                warn!(binding = %id, "Event skipped: {}", e);
                None
            }
        }
    }
}
