//! Input coalescing from terminal widgets to the channel.
//!
//! Keystrokes are appended to the instance's pending-input buffer as they
//! arrive. A per-instance flush timer, started when the widget attaches,
//! turns whatever accumulated since the previous tick into a single
//! `terminal in` message. Idle ticks send nothing.
//!
//! The wire carries text, so a multi-byte UTF-8 character split across two
//! input events is held back until its remaining bytes arrive.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::instance::Instance;
use crate::protocol::OutboundEvent;
use crate::timer::TimerHandle;

/// Append raw input to the instance's pending buffer.
pub fn push(instance: &mut Instance, data: &[u8]) {
    instance.pending_input.extend_from_slice(data);
}

/// Take the pending input as one outbound message.
///
/// Returns `None` when nothing complete is pending.
pub fn flush(instance: &mut Instance) -> Option<OutboundEvent> {
    let buffer = &mut instance.pending_input;
    let ready = buffer.len() - incomplete_tail_len(buffer);
    if ready == 0 {
        return None;
    }

    let chunk: Vec<u8> = buffer.drain(..ready).collect();
    let data = match String::from_utf8(chunk) {
        Ok(text) => text,
        Err(e) => {
            log::warn!(
                "[Session] Invalid UTF-8 in input for {}, replacing",
                instance.name
            );
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };

    Some(OutboundEvent::TerminalIn {
        name: instance.name.clone(),
        data,
    })
}

/// Start the instance's periodic flush timer.
///
/// Replaces (and cancels) any previous timer.
pub fn start_flush_timer<E, F>(
    instance: &mut Instance,
    period: Duration,
    tx: UnboundedSender<E>,
    make: F,
) where
    E: Send + 'static,
    F: Fn() -> E + Send + 'static,
{
    if let Some(mut previous) = instance.flush_timer.take() {
        previous.cancel();
    }
    instance.flush_timer = Some(TimerHandle::every(period, tx, make));
    log::trace!(
        "[Session] Flush timer started for {} ({}ms)",
        instance.name,
        period.as_millis()
    );
}

/// Length of a trailing, not yet complete UTF-8 sequence.
fn incomplete_tail_len(buf: &[u8]) -> usize {
    // A sequence is at most 4 bytes, so only the last 3 can be a partial one.
    let window = buf.len().min(3);
    for back in 1..=window {
        let byte = buf[buf.len() - back];
        if byte & 0xC0 == 0x80 {
            // continuation byte, keep looking for the lead
            continue;
        }
        let expected = match byte {
            b if b & 0xE0 == 0xC0 => 2,
            b if b & 0xF0 == 0xE0 => 3,
            b if b & 0xF8 == 0xF0 => 4,
            _ => 1,
        };
        return if back < expected { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceRecord;
    use tokio::sync::mpsc;

    fn instance() -> Instance {
        Instance::from_record(InstanceRecord::named("node1"))
    }

    #[test]
    fn test_flush_coalesces_in_order() {
        let mut node = instance();
        push(&mut node, b"l");
        push(&mut node, b"s");
        push(&mut node, b" -la\r");

        assert_eq!(
            flush(&mut node),
            Some(OutboundEvent::TerminalIn {
                name: "node1".into(),
                data: "ls -la\r".into(),
            })
        );
        assert!(node.pending_input().is_empty());
    }

    #[test]
    fn test_flush_empty_sends_nothing() {
        let mut node = instance();
        assert_eq!(flush(&mut node), None);
    }

    #[test]
    fn test_flush_holds_back_split_character() {
        let mut node = instance();
        let euro = "€".as_bytes();
        push(&mut node, b"a");
        push(&mut node, &euro[..2]);

        assert_eq!(
            flush(&mut node),
            Some(OutboundEvent::TerminalIn {
                name: "node1".into(),
                data: "a".into(),
            })
        );
        assert_eq!(node.pending_input(), &euro[..2]);

        // only the partial character is pending
        assert_eq!(flush(&mut node), None);

        push(&mut node, &euro[2..]);
        assert_eq!(
            flush(&mut node),
            Some(OutboundEvent::TerminalIn {
                name: "node1".into(),
                data: "€".into(),
            })
        );
    }

    #[test]
    fn test_incomplete_tail_len() {
        assert_eq!(incomplete_tail_len(b""), 0);
        assert_eq!(incomplete_tail_len(b"abc"), 0);
        assert_eq!(incomplete_tail_len("é".as_bytes()), 0);
        assert_eq!(incomplete_tail_len(&"😀".as_bytes()[..3]), 3);
        assert_eq!(incomplete_tail_len(&"😀".as_bytes()[..1]), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_timer_ticks_and_is_replaced() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut node = instance();

        start_flush_timer(&mut node, Duration::from_millis(70), tx.clone(), || 1_u8);
        start_flush_timer(&mut node, Duration::from_millis(70), tx, || 2_u8);
        assert!(node.has_flush_timer());

        tokio::time::sleep(Duration::from_millis(75)).await;
        assert_eq!(rx.try_recv().ok(), Some(2));
        assert!(rx.try_recv().is_err());
    }
}
