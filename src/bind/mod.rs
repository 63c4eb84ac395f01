//! Bindings between store keys and in-process values.
//!
//! A binding owns a store key (or prefix), a decode [`Pipeline`], a mutex
//! and the result collection the pipeline writes into. Its watch loop runs
//! on its own task; events of one binding are applied strictly one at a
//! time and in delivery order, with the initial snapshot always first.

mod binding;
mod handler;
mod watch_loop;
pub use binding::*;
pub use handler::*;
pub use watch_loop::BindState;
pub(crate) use watch_loop::WatchLoop;

#[cfg(test)]
mod handler_test;
