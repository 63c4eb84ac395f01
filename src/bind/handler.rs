//! Decode pipeline stages.
//!
//! Every event of a binding runs through its [`Pipeline`] in registration
//! order while the binding's lock is held. A stage either updates the result
//! collection and returns `Ok(())`, or fails without touching it; the first
//! failure skips the remaining stages for that event.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::ResultMap;
use super::TargetFn;
use crate::codec::Codec;
use crate::codec::JsonCodec;
use crate::codec::TextCodec;
use crate::diff::ConfigValue;
use crate::diff::ListenerRegistry;
use crate::store::Event;
use crate::store::EventType;
use crate::Error;
use crate::Result;

/// Binding state visible to a pipeline stage for one event
pub struct BindContext<'a, T> {
    /// Absolute key (or prefix) the binding watches
    pub binding_key: &'a str,
    pub event: &'a Event,
    pub target: &'a TargetFn<T>,
    pub result: &'a mut ResultMap<T>,
}

impl<T> BindContext<'_, T> {
    /// Fresh instance from the binding's target constructor
    pub fn new_target(&self) -> T {
        (self.target)()
    }
}

/// One stage of a decode pipeline
pub trait DecodeHandler<T>: Send + Sync {
    /// # Errors
    /// A failure must leave `ctx.result` as it was before the call.
    fn handle(
        &self,
        ctx: &mut BindContext<'_, T>,
    ) -> Result<()>;
}

/// Ordered decode stages of one binding
pub struct Pipeline<T> {
    handlers: Vec<Box<dyn DecodeHandler<T>>>,
}

impl<T> Default for Pipeline<T> {
    fn default() -> Self {
        Self { handlers: Vec::new() }
    }
}

impl<T> Pipeline<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage
    pub fn then(
        mut self,
        handler: impl DecodeHandler<T> + 'static,
    ) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs every stage, stopping at the first failure
    pub(crate) fn run(
        &self,
        ctx: &mut BindContext<'_, T>,
    ) -> Result<()> {
        for handler in &self.handlers {
            handler.handle(ctx)?;
        }
        Ok(())
    }
}

/// Stage built from a closure, see [`from_fn`]
pub struct FnHandler<F> {
    f: F,
}

/// Wraps a closure as a pipeline stage.
///
/// ```ignore
/// let count_only = from_fn(|ctx: &mut BindContext<'_, Student>| {
///     tracing::info!(key = %ctx.event.key, "seen");
///     Ok(())
/// });
/// ```
pub fn from_fn<T, F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut BindContext<'_, T>) -> Result<()> + Send + Sync,
{
    FnHandler { f }
}

impl<T, F> DecodeHandler<T> for FnHandler<F>
where
    F: Fn(&mut BindContext<'_, T>) -> Result<()> + Send + Sync,
{
    fn handle(
        &self,
        ctx: &mut BindContext<'_, T>,
    ) -> Result<()> {
        (self.f)(ctx)
    }
}

/// Decodes PUT values with a codec into a fresh target and stores them under
/// the event key. A DELETE removes the entry and reports
/// [`Error::DeletedKey`].
#[derive(Debug, Clone, Default)]
pub struct TypedHandler<C> {
    codec: C,
}

impl<C> TypedHandler<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }
}

impl<T, C> DecodeHandler<T> for TypedHandler<C>
where
    C: Codec<T>,
    T: Send + Sync,
{
    fn handle(
        &self,
        ctx: &mut BindContext<'_, T>,
    ) -> Result<()> {
        let key = &ctx.event.key;
        match ctx.event.kind {
            EventType::Delete => {
                ctx.result.remove(key);
                Err(Error::DeletedKey { key: key.clone() })
            }
            EventType::Put => {
                let seed = ctx.new_target();
                let value = self
                    .codec
                    .decode(seed, &ctx.event.value)
                    .map_err(|e| Error::decode(key.as_str(), e))?;
                ctx.result.insert(key.clone(), Arc::new(value));
                debug!(key = %key, revision = ctx.event.revision, "Bound value decoded");
                Ok(())
            }
        }
    }
}

/// Typed handler decoding JSON
pub fn json_handler() -> TypedHandler<JsonCodec> {
    TypedHandler::new(JsonCodec)
}

/// Handler storing values as UTF-8 text
pub type TextHandler = TypedHandler<TextCodec>;

pub fn text_handler() -> TextHandler {
    TypedHandler::new(TextCodec)
}

/// Wraps a stage and reports field-level changes of the event's entry
///
/// The entry is captured before the inner stage runs and compared with what
/// the stage left behind. Deletion counts as a change towards an absent
/// value. Other inner failures skip the diff.
///
/// Listeners are notified while the binding mutex is held, so a listener
/// must not read its own binding through [`super::BindHandle::current`] or
/// [`super::MultiResult`]; doing so deadlocks the watch loop.
pub struct FieldDiff<H> {
    inner: H,
    listeners: Arc<ListenerRegistry>,
}

impl<H> FieldDiff<H> {
    pub fn new(
        inner: H,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self { inner, listeners }
    }
}

impl<T, H> DecodeHandler<T> for FieldDiff<H>
where
    H: DecodeHandler<T>,
    T: Serialize + Send + Sync,
{
    fn handle(
        &self,
        ctx: &mut BindContext<'_, T>,
    ) -> Result<()> {
        let before = ctx.result.get(&ctx.event.key).cloned();
        let outcome = self.inner.handle(ctx);
        if let Err(e) = &outcome {
            if !matches!(e, Error::DeletedKey { .. }) {
                return outcome;
            }
        }
        let after = ctx.result.get(&ctx.event.key).cloned();

        match (describe(before.as_deref()), describe(after.as_deref())) {
            (Ok(old), Ok(new)) => {
                self.listeners.diff_and_notify(&old, &new);
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(key = %ctx.event.key, "Field diff skipped: {}", e);
            }
        }
        outcome
    }
}

fn describe<T: Serialize>(value: Option<&T>) -> Result<ConfigValue> {
    match value {
        Some(value) => ConfigValue::from_serialize(value),
        None => Ok(ConfigValue::Null),
    }
}
