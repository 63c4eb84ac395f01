//! Keeps typed in-process configuration synchronized with a remote
//! versioned key-value store.
//!
//! A [`Client`] binds store keys (or whole prefixes) to values built by a
//! target constructor. Each binding reads a snapshot of its range, decodes
//! it through its [`Pipeline`], then follows the store's watch stream so the
//! bound values track every later PUT and DELETE. A [`FieldDiff`] stage turns
//! those updates into field-level notifications for listeners registered on
//! dotted paths such as `Services[0].Hooks` or `DataSource.cache`.
//!
//! ```text
//! KvStore ──get──▶ snapshot ──┐
//!         ──watch─▶ events ───┴─▶ Pipeline ─▶ ResultMap ─▶ BindHandle / MultiResult
//!                                   │
//!                                   └─ FieldDiff ─▶ ListenerRegistry ─▶ callbacks
//! ```

mod bind;
mod client;
mod codec;
mod config;
mod diff;
mod errors;
mod key;
mod metrics;
mod store;

pub use bind::*;
pub use client::*;
pub use codec::*;
pub use config::*;
pub use diff::*;
pub use errors::*;
pub use key::*;
pub use metrics::*;
pub use store::*;
