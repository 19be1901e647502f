//! Session lifecycle: expiry countdown, termination and viewport state.
//!
//! # Termination
//!
//! [`Session::terminate`] flips `alive` to false exactly once. The engine
//! checks [`Session::is_alive`] before every instance operation, so nothing
//! is originated once the backend has ended the session.
//!
//! # Viewport
//!
//! Two flows meet in [`Viewport`]:
//!
//! ```text
//!  local resize ──► propose() ──(debounce)──► settle() ──► send if changed
//!
//!  remote push  ──► apply_remote() ──► every widget resized, late attaches too
//! ```

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc::UnboundedSender;

use crate::constants::TTL_UNKNOWN;
use crate::terminal::Geometry;
use crate::timer::TimerHandle;

/// The playground session as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session identifier.
    pub id: String,
    /// When the backend created the session.
    pub created_at: Option<DateTime<Utc>>,
    /// When the backend will reap the session.
    pub expires_at: Option<DateTime<Utc>>,
    /// `false` while the backend is still provisioning.
    pub ready: bool,
    alive: bool,
}

impl Session {
    /// A live session whose timestamps are not known yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            expires_at: None,
            ready: true,
            alive: true,
        }
    }

    /// Whether the session has not been terminated.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Mark the session terminated.
    ///
    /// Returns `true` only on the first call.
    pub fn terminate(&mut self) -> bool {
        std::mem::replace(&mut self.alive, false)
    }

    /// Time left until expiry, clamped at zero.
    ///
    /// `None` until both timestamps are known.
    pub fn ttl_remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.created_at?;
        let expires_at = self.expires_at?;
        Some((expires_at - now).max(TimeDelta::zero()))
    }

    /// Countdown text for display.
    pub fn ttl_text(&self, now: DateTime<Utc>) -> String {
        format_ttl(self.ttl_remaining(now))
    }
}

/// Render a countdown as `HH:MM:SS`, or `--:--:--` when unknown.
pub fn format_ttl(remaining: Option<TimeDelta>) -> String {
    match remaining {
        Some(delta) => {
            let secs = delta.num_seconds().max(0);
            format!(
                "{:02}:{:02}:{:02}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60
            )
        }
        None => TTL_UNKNOWN.to_string(),
    }
}

/// Local and remote viewport geometry.
#[derive(Debug, Default)]
pub struct Viewport {
    /// Last geometry pushed by the backend; late widgets are sized to it.
    current: Option<Geometry>,
    /// Last geometry this client sent.
    last_sent: Option<Geometry>,
    /// Latest local proposal waiting for the debounce to settle.
    pending: Option<Geometry>,
    debounce: Option<TimerHandle>,
}

impl Viewport {
    /// Empty viewport state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local geometry proposal and (re)start the debounce.
    ///
    /// Only the last proposal of a burst survives. When the quiet period
    /// ends, `event` is delivered on `tx` and the caller should call
    /// [`Self::settle`].
    pub fn propose<E>(
        &mut self,
        geometry: Geometry,
        delay: Duration,
        tx: UnboundedSender<E>,
        event: E,
    ) where
        E: Send + 'static,
    {
        self.pending = Some(geometry);
        if let Some(mut previous) = self.debounce.take() {
            previous.cancel();
        }
        self.debounce = Some(TimerHandle::after(delay, tx, event));
    }

    /// Consume the settled proposal.
    ///
    /// Returns the geometry to send, or `None` when it is degenerate or
    /// equal to what was last sent.
    pub fn settle(&mut self) -> Option<Geometry> {
        if let Some(mut timer) = self.debounce.take() {
            timer.cancel();
        }
        let geometry = self.pending.take()?;
        if geometry.is_degenerate() {
            log::debug!("[Session] Ignoring degenerate viewport {}", geometry);
            return None;
        }
        if self.last_sent == Some(geometry) {
            return None;
        }
        self.last_sent = Some(geometry);
        Some(geometry)
    }

    /// Remember a geometry pushed by the backend.
    pub fn apply_remote(&mut self, geometry: Geometry) {
        self.current = Some(geometry);
    }

    /// Geometry late-attached widgets should take.
    pub fn current(&self) -> Option<Geometry> {
        self.current
    }

    /// Last geometry sent to the backend.
    pub fn last_sent(&self) -> Option<Geometry> {
        self.last_sent
    }

    /// Whether a debounce is in flight.
    pub fn is_debouncing(&self) -> bool {
        self.debounce.as_ref().is_some_and(TimerHandle::is_active)
    }

    /// Cancel any pending debounce.
    pub fn cancel(&mut self) {
        if let Some(mut timer) = self.debounce.take() {
            timer.cancel();
        }
        self.pending = None;
    }
}
