//! Output routing from the channel to terminal widgets.
//!
//! Terminal output can arrive before anything is ready to draw it: the
//! instance may not be selected yet, or the data message may even race
//! ahead of the push that announces the instance. Bytes are therefore
//! written straight to a widget when one is attached, and appended to the
//! instance's pending buffer otherwise. Attaching a widget drains that
//! buffer exactly once, before any later live bytes, so history is never
//! lost or reordered.
//!
//! The session builder console follows the same rules through
//! [`BuilderConsole`].

use crate::instance::{Instance, InstanceRecord};
use crate::registry::Registry;
use crate::terminal::{Geometry, TerminalWidget};

/// Where routed bytes ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the attached widget.
    Written,
    /// Appended to the pending buffer.
    Buffered,
}

/// Route inbound terminal bytes to the named instance.
///
/// Unknown names get a minimal entity so output racing ahead of its
/// instance announcement is kept. The later announcement merges into it.
pub fn route(registry: &mut Registry, name: &str, data: &[u8]) -> Delivery {
    if !registry.contains(name) {
        log::debug!(
            "[Session] Output for unannounced instance {}, creating placeholder",
            name
        );
        registry.upsert(InstanceRecord::named(name));
    }

    match registry.get_mut(name) {
        Some(instance) => deliver(&mut instance.term, &mut instance.pending_output, data),
        None => Delivery::Buffered,
    }
}

/// Attach a widget to an instance and drain its pending output into it.
///
/// The widget is opened, resized to `viewport` when one is known, and then
/// receives the whole buffer in one write. Does nothing if a widget is
/// already attached.
pub fn attach(
    instance: &mut Instance,
    widget: Box<dyn TerminalWidget>,
    viewport: Option<Geometry>,
) -> bool {
    if instance.term.is_some() {
        return false;
    }
    let drained = instance.pending_output.len();
    install(&mut instance.term, &mut instance.pending_output, widget, viewport);
    log::debug!(
        "[Session] Attached widget to {} ({} buffered bytes drained)",
        instance.name,
        drained
    );
    true
}

/// Write any pending output to the attached widget.
///
/// Returns the number of bytes flushed.
pub fn flush_pending(instance: &mut Instance) -> usize {
    drain(&mut instance.term, &mut instance.pending_output)
}

/// Resize an instance's widget and flush whatever was still pending.
pub fn resize_and_flush(instance: &mut Instance, geometry: Geometry) -> usize {
    match instance.term.as_mut() {
        Some(term) => {
            term.resize(geometry);
            flush_pending(instance)
        }
        None => 0,
    }
}

/// Output sink for the session builder console.
#[derive(Debug, Default)]
pub struct BuilderConsole {
    term: Option<Box<dyn TerminalWidget>>,
    pending: Vec<u8>,
}

impl BuilderConsole {
    /// Empty console with no widget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route builder output.
    pub fn write(&mut self, data: &[u8]) -> Delivery {
        deliver(&mut self.term, &mut self.pending, data)
    }

    /// Attach the console widget and drain buffered output into it.
    pub fn attach(&mut self, widget: Box<dyn TerminalWidget>, viewport: Option<Geometry>) -> bool {
        if self.term.is_some() {
            return false;
        }
        install(&mut self.term, &mut self.pending, widget, viewport);
        true
    }

    /// Resize the console widget, if attached.
    pub fn resize(&mut self, geometry: Geometry) {
        if let Some(term) = self.term.as_mut() {
            term.resize(geometry);
        }
        drain(&mut self.term, &mut self.pending);
    }

    /// Whether a widget is attached.
    pub fn has_widget(&self) -> bool {
        self.term.is_some()
    }

    /// Bytes received before a widget was attached.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Drop the widget and any buffered output.
    pub fn release(&mut self) {
        self.term = None;
        self.pending.clear();
    }
}

fn deliver(
    term: &mut Option<Box<dyn TerminalWidget>>,
    pending: &mut Vec<u8>,
    data: &[u8],
) -> Delivery {
    match term.as_mut() {
        Some(term) => {
            term.write(data);
            Delivery::Written
        }
        None => {
            pending.extend_from_slice(data);
            Delivery::Buffered
        }
    }
}

fn install(
    slot: &mut Option<Box<dyn TerminalWidget>>,
    pending: &mut Vec<u8>,
    mut widget: Box<dyn TerminalWidget>,
    viewport: Option<Geometry>,
) {
    widget.open();
    if let Some(geometry) = viewport {
        widget.resize(geometry);
    }
    *slot = Some(widget);
    drain(slot, pending);
}

fn drain(term: &mut Option<Box<dyn TerminalWidget>>, pending: &mut Vec<u8>) -> usize {
    match term.as_mut() {
        Some(term) if !pending.is_empty() => {
            let bytes = std::mem::take(pending);
            term.write(&bytes);
            bytes.len()
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Open,
        Write(Vec<u8>),
        Resize(Geometry),
    }

    #[derive(Debug, Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<Call>>>);

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.0.lock().expect("recorder lock").clone()
        }

        fn written(&self) -> Vec<u8> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Write(bytes) => Some(bytes),
                    _ => None,
                })
                .flatten()
                .collect()
        }
    }

    impl TerminalWidget for Recorder {
        fn open(&mut self) {
            self.0.lock().expect("recorder lock").push(Call::Open);
        }
        fn write(&mut self, data: &[u8]) {
            self.0
                .lock()
                .expect("recorder lock")
                .push(Call::Write(data.to_vec()));
        }
        fn resize(&mut self, geometry: Geometry) {
            self.0
                .lock()
                .expect("recorder lock")
                .push(Call::Resize(geometry));
        }
        fn focus(&mut self) {}
    }

    #[test]
    fn test_output_before_and_after_attach_keeps_order() {
        let mut registry = Registry::new();
        registry.upsert(InstanceRecord::named("node1"));

        assert_eq!(route(&mut registry, "node1", b"one "), Delivery::Buffered);
        assert_eq!(route(&mut registry, "node1", b"two "), Delivery::Buffered);

        let widget = Recorder::default();
        let instance = registry.get_mut("node1").expect("node1");
        assert!(attach(instance, Box::new(widget.clone()), None));
        assert!(instance.pending_output().is_empty());

        assert_eq!(route(&mut registry, "node1", b"three"), Delivery::Written);
        assert_eq!(widget.written(), b"one two three");
        // drained in a single write
        assert_eq!(
            widget.calls(),
            vec![
                Call::Open,
                Call::Write(b"one two ".to_vec()),
                Call::Write(b"three".to_vec()),
            ]
        );
    }

    #[test]
    fn test_route_to_unknown_creates_placeholder() {
        let mut registry = Registry::new();
        route(&mut registry, "node9", b"early");

        let instance = registry.get("node9").expect("placeholder");
        assert_eq!(instance.pending_output(), b"early");
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_attach_resizes_before_drain() {
        let mut registry = Registry::new();
        route(&mut registry, "node1", b"history");

        let widget = Recorder::default();
        let instance = registry.get_mut("node1").expect("node1");
        attach(instance, Box::new(widget.clone()), Some(Geometry::new(80, 24)));

        assert_eq!(
            widget.calls(),
            vec![
                Call::Open,
                Call::Resize(Geometry::new(80, 24)),
                Call::Write(b"history".to_vec()),
            ]
        );
    }

    #[test]
    fn test_second_attach_is_ignored() {
        let mut registry = Registry::new();
        route(&mut registry, "node1", b"x");
        let instance = registry.get_mut("node1").expect("node1");

        let first = Recorder::default();
        let second = Recorder::default();
        assert!(attach(instance, Box::new(first.clone()), None));
        assert!(!attach(instance, Box::new(second.clone()), None));
        assert!(second.calls().is_empty());
    }

    #[test]
    fn test_empty_buffer_is_not_written() {
        let mut registry = Registry::new();
        registry.upsert(InstanceRecord::named("node1"));
        let widget = Recorder::default();
        let instance = registry.get_mut("node1").expect("node1");
        attach(instance, Box::new(widget.clone()), None);
        assert_eq!(widget.calls(), vec![Call::Open]);
        assert_eq!(flush_pending(instance), 0);
    }

    #[test]
    fn test_builder_console_buffers_until_attached() {
        let mut console = BuilderConsole::new();
        assert_eq!(console.write(b"pulling "), Delivery::Buffered);
        assert_eq!(console.write(b"image"), Delivery::Buffered);

        let widget = Recorder::default();
        assert!(console.attach(Box::new(widget.clone()), None));
        assert_eq!(console.write(b"\r\ndone"), Delivery::Written);
        assert_eq!(widget.written(), b"pulling image\r\ndone");
        assert!(console.pending().is_empty());
    }
}
