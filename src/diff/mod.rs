//! Field-level change detection between configuration snapshots.
//!
//! [`diff`] walks an old and a new [`ConfigValue`] side by side (field by
//! field for structs, key by key for mappings, index by index for sequences)
//! and reports every differing leaf under its [`FieldPath`]. A
//! [`ListenerRegistry`] then fans the changes out to callbacks registered on
//! that path or any ancestor of it.
//!
//! ```ignore
//! let registry = ListenerRegistry::new();
//! registry.register("DataSource.cache", |change: &FieldChange| {
//!     println!("cache moved to {}", change.new);
//! })?;
//! registry.diff_and_notify(&old, &new);
//! ```

mod listener;
mod path;
mod value;
pub use listener::*;
pub use path::*;
pub use value::*;

#[cfg(test)]
mod diff_test;

use crate::Error;

/// One differing leaf between two snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub path: FieldPath,
    /// Value before the change; `Null` when the field was absent
    pub old: ConfigValue,
    /// Value after the change; `Null` when the field was removed
    pub new: ConfigValue,
}

/// Outcome of comparing two snapshots
#[derive(Debug, Default)]
pub struct DiffReport {
    pub changes: Vec<FieldChange>,
    /// One [`Error::DiffShape`] per subtree whose shapes are incompatible
    pub errors: Vec<Error>,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.errors.is_empty()
    }
}

/// Compares `old` and `new` without mutating either.
pub fn diff(
    old: &ConfigValue,
    new: &ConfigValue,
) -> DiffReport {
    let mut report = DiffReport::default();
    let mut path = FieldPath::root();
    walk(&mut path, old, new, &mut report);
    report
}

fn walk(
    path: &mut FieldPath,
    old: &ConfigValue,
    new: &ConfigValue,
    report: &mut DiffReport,
) {
    match (old, new) {
        (ConfigValue::Map(before), ConfigValue::Map(after)) => {
            let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
            keys.sort();
            keys.dedup();

            for key in keys {
                path.push(PathSegment::Field(key.clone()));
                compare_entry(path, before.get(key), after.get(key), report);
                path.pop();
            }
        }
        (ConfigValue::List(before), ConfigValue::List(after)) => {
            for index in 0..before.len().max(after.len()) {
                path.push(PathSegment::Index(index));
                compare_entry(path, before.get(index), after.get(index), report);
                path.pop();
            }
        }
        (ConfigValue::Null, ConfigValue::Null) => {}
        (ConfigValue::Null, _) | (_, ConfigValue::Null) => record(path, old, new, report),
        (ConfigValue::Map(_) | ConfigValue::List(_), _) | (_, ConfigValue::Map(_) | ConfigValue::List(_)) => {
            shape_error(path, old, new, report)
        }
        (old_leaf, new_leaf) if old_leaf.kind() != new_leaf.kind() => {
            shape_error(path, old, new, report)
        }
        (old_leaf, new_leaf) => {
            // Leaves compare by serialized form, so 5 and 5.0 differ.
            if old_leaf.to_string() != new_leaf.to_string() {
                record(path, old, new, report);
            }
        }
    }
}

fn compare_entry(
    path: &mut FieldPath,
    old: Option<&ConfigValue>,
    new: Option<&ConfigValue>,
    report: &mut DiffReport,
) {
    match (old, new) {
        (Some(old), Some(new)) => walk(path, old, new, report),
        (Some(old), None) if !old.is_null() => record(path, old, &ConfigValue::Null, report),
        (None, Some(new)) if !new.is_null() => record(path, &ConfigValue::Null, new, report),
        _ => {}
    }
}

fn record(
    path: &FieldPath,
    old: &ConfigValue,
    new: &ConfigValue,
    report: &mut DiffReport,
) {
    report.changes.push(FieldChange {
        path: path.clone(),
        old: old.clone(),
        new: new.clone(),
    });
}

fn shape_error(
    path: &FieldPath,
    old: &ConfigValue,
    new: &ConfigValue,
    report: &mut DiffReport,
) {
    report.errors.push(Error::DiffShape {
        path: path.to_string(),
        message: format!("{} cannot be compared with {}", old.kind(), new.kind()),
    });
}
