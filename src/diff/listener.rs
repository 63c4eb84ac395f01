use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use tracing::warn;

use super::diff;
use super::ConfigValue;
use super::DiffReport;
use super::FieldChange;
use super::FieldPath;
use crate::metrics::FIELD_CHANGES;
use crate::Result;

/// Callback invoked with one differing leaf
pub type FieldCallback = Arc<dyn Fn(&FieldChange) + Send + Sync>;

/// Identifies a registration for [`ListenerRegistry::unregister`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    path: FieldPath,
    callback: FieldCallback,
}

/// Field listeners keyed by path
///
/// Registration is rare and dispatch frequent, so the registry sits behind a
/// reader-writer lock. Callbacks run after the lock is released and may
/// register further listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    registrations: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish_non_exhaustive()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` on `path`.
    ///
    /// Listeners on the same path run in registration order.
    ///
    /// # Errors
    /// - [`crate::Error::InvalidPath`] when `path` is malformed
    pub fn register<F>(
        &self,
        path: &str,
        callback: F,
    ) -> Result<ListenerId>
    where
        F: Fn(&FieldChange) + Send + Sync + 'static,
    {
        let path = FieldPath::parse(path)?;
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(listener_id = id.0, path = %path, "Field listener registered");

        self.registrations.write().push(Registration {
            id,
            path,
            callback: Arc::new(callback),
        });
        Ok(id)
    }

    /// Removes a registration; returns false if it was already gone
    pub fn unregister(
        &self,
        id: ListenerId,
    ) -> bool {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        before != registrations.len()
    }

    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every listener whose path equals or is an ancestor of a
    /// changed leaf, once per leaf. Returns the number of invocations.
    ///
    /// A change that adds or removes a whole subtree also reaches listeners
    /// registered below it, with the values projected to their own path. They
    /// are skipped when the projected values are equal.
    pub fn notify(
        &self,
        report: &DiffReport,
    ) -> usize {
        for error in &report.errors {
            warn!("Field diff skipped subtree: {}", error);
        }

        let mut invoked = 0;
        for change in &report.changes {
            FIELD_CHANGES.inc();
            let deliveries: Vec<(FieldCallback, Option<FieldChange>)> = self
                .registrations
                .read()
                .iter()
                .filter_map(|r| {
                    if r.path.is_prefix_of(&change.path) {
                        return Some((r.callback.clone(), None));
                    }
                    project(change, &r.path).map(|projected| (r.callback.clone(), Some(projected)))
                })
                .collect();

            for (callback, projected) in deliveries {
                callback(projected.as_ref().unwrap_or(change));
                invoked += 1;
            }
        }
        invoked
    }

    /// Diffs two snapshots and dispatches the changes
    pub fn diff_and_notify(
        &self,
        old: &ConfigValue,
        new: &ConfigValue,
    ) -> DiffReport {
        let report = diff(old, new);
        self.notify(&report);
        report
    }
}

/// Narrows a subtree change to a listener registered beneath it
fn project(
    change: &FieldChange,
    listener: &FieldPath,
) -> Option<FieldChange> {
    let relative = listener.strip_prefix(&change.path)?;
    let old = change.old.get(&relative).cloned().unwrap_or_default();
    let new = change.new.get(&relative).cloned().unwrap_or_default();
    if old.to_string() == new.to_string() {
        return None;
    }
    Some(FieldChange {
        path: listener.clone(),
        old,
        new,
    })
}
