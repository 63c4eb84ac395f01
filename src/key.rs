//! Store key resolution relative to the configured root.

/// Separator between path segments in the store key namespace
pub const KEY_SEPARATOR: char = '/';

/// Computes the absolute store key for `subpath` under `root`.
///
/// - A `subpath` beginning with [`KEY_SEPARATOR`] is already absolute and is
///   returned unchanged.
/// - An empty `subpath` resolves to `root` itself.
/// - Otherwise the two are joined with a single separator, so a root that
///   already ends with one (as parsed from `etcd://host/com/demo/`) is not
///   doubled.
pub fn resolve_key(
    root: &str,
    subpath: &str,
) -> String {
    if subpath.starts_with(KEY_SEPARATOR) {
        return subpath.to_string();
    }
    if subpath.is_empty() {
        return root.to_string();
    }
    if root.ends_with(KEY_SEPARATOR) {
        format!("{root}{subpath}")
    } else {
        format!("{root}{KEY_SEPARATOR}{subpath}")
    }
}
