//! Event dispatch from decoded inbound messages to handlers.
//!
//! Handlers are registered per [`EventKind`] and run synchronously, in
//! registration order, with mutable access to a shared context (the
//! engine's state). One handler failing, by returning `Err` or by
//! panicking, never keeps the handlers after it from seeing the same
//! event.
//!
//! # Usage
//!
//! ```ignore
//! let mut dispatcher: Dispatcher<Counter> = Dispatcher::new();
//! dispatcher.on(EventKind::SessionEnd, |counter, _event| {
//!     counter.ended += 1;
//!     Ok(())
//! });
//! let report = dispatcher.dispatch(&mut counter, &InboundEvent::SessionEnd);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::protocol::{EventKind, InboundEvent};

/// Boxed event handler over context `C`.
pub type Handler<C> = Box<dyn FnMut(&mut C, &InboundEvent) -> anyhow::Result<()> + Send>;

/// Outcome of delivering one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

impl DispatchReport {
    /// Whether no handler was registered for the event.
    pub fn is_unhandled(&self) -> bool {
        self.delivered == 0 && self.failed == 0
    }
}

/// Routes events to handlers keyed by [`EventKind`].
pub struct Dispatcher<C> {
    handlers: HashMap<EventKind, Vec<Handler<C>>>,
}

impl<C> fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&EventKind, usize> =
            self.handlers.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("Dispatcher")
            .field("handlers", &counts)
            .finish_non_exhaustive()
    }
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Dispatcher<C> {
    /// Dispatcher with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler after any already registered for `kind`.
    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&mut C, &InboundEvent) -> anyhow::Result<()> + Send + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every handler registered for its kind.
    pub fn dispatch(&mut self, ctx: &mut C, event: &InboundEvent) -> DispatchReport {
        let kind = event.kind();
        let mut report = DispatchReport::default();

        let Some(handlers) = self.handlers.get_mut(&kind) else {
            log::trace!("[Session] No handlers for {}", kind);
            return report;
        };

        for (idx, handler) in handlers.iter_mut().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(ctx, event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    log::warn!("[Session] Handler #{} for {} failed: {:#}", idx, kind, e);
                    report.failed += 1;
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    log::error!("[Session] Handler #{} for {} panicked: {}", idx, kind, message);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Trace(Vec<&'static str>);

    #[test]
    fn test_handlers_run_in_registration_order() {
        let mut dispatcher: Dispatcher<Trace> = Dispatcher::new();
        dispatcher.on(EventKind::SessionEnd, |t, _| {
            t.0.push("first");
            Ok(())
        });
        dispatcher.on(EventKind::SessionEnd, |t, _| {
            t.0.push("second");
            Ok(())
        });

        let mut trace = Trace::default();
        let report = dispatcher.dispatch(&mut trace, &InboundEvent::SessionEnd);

        assert_eq!(trace.0, ["first", "second"]);
        assert_eq!(report, DispatchReport { delivered: 2, failed: 0 });
    }

    #[test]
    fn test_failure_does_not_block_later_handlers() {
        let mut dispatcher: Dispatcher<Trace> = Dispatcher::new();
        dispatcher.on(EventKind::SessionEnd, |_, _| anyhow::bail!("boom"));
        dispatcher.on(EventKind::SessionEnd, |_, _| panic!("worse"));
        dispatcher.on(EventKind::SessionEnd, |t, _| {
            t.0.push("reached");
            Ok(())
        });

        let mut trace = Trace::default();
        let report = dispatcher.dispatch(&mut trace, &InboundEvent::SessionEnd);

        assert_eq!(trace.0, ["reached"]);
        assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
    }

    #[test]
    fn test_kind_without_handlers_is_noop() {
        let mut dispatcher: Dispatcher<Trace> = Dispatcher::new();
        dispatcher.on(EventKind::SessionEnd, |t, _| {
            t.0.push("end");
            Ok(())
        });

        let mut trace = Trace::default();
        let report = dispatcher.dispatch(&mut trace, &InboundEvent::Connected);

        assert!(report.is_unhandled());
        assert!(trace.0.is_empty());
        assert_eq!(dispatcher.handler_count(EventKind::SessionEnd), 1);
        assert_eq!(dispatcher.handler_count(EventKind::Connected), 0);
    }
}
