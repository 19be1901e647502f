//! Engine state shared by the built-in handlers and embedder observers.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use super::events::{EngineEvent, Notice};
use crate::config::Config;
use crate::constants;
use crate::error::SessionError;
use crate::input;
use crate::lifecycle::{Session, Viewport};
use crate::output::{self, BuilderConsole};
use crate::protocol::OutboundEvent;
use crate::registry::Registry;
use crate::terminal::{Geometry, TerminalWidget, WidgetFactory};
use crate::timer::TimerHandle;
use crate::transport::Channel;

/// Timing knobs for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Input flush period per instance.
    pub flush_interval: Duration,
    /// Quiet period for local resizes.
    pub resize_debounce: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            flush_interval: constants::INPUT_FLUSH_INTERVAL,
            resize_debounce: constants::RESIZE_DEBOUNCE,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            flush_interval: config.flush_interval(),
            resize_debounce: config.resize_debounce(),
        }
    }
}

/// Everything the engine mutates while handling an event.
pub struct SessionCore {
    pub(crate) registry: Registry,
    pub(crate) session: Session,
    pub(crate) viewport: Viewport,
    pub(crate) builder: BuilderConsole,
    pub(crate) connected: bool,
    channel: Box<dyn Channel>,
    widgets: Box<dyn WidgetFactory>,
    events_tx: UnboundedSender<EngineEvent>,
    notices_tx: UnboundedSender<Notice>,
    settings: EngineSettings,
    ttl_timer: Option<TimerHandle>,
    ttl_text: String,
    clock_anchor: (Instant, DateTime<Utc>),
}

impl fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCore")
            .field("session", &self.session)
            .field("instances", &self.registry.names())
            .field("selected", &self.registry.selected_name())
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl SessionCore {
    pub(crate) fn new(
        session_id: &str,
        settings: EngineSettings,
        channel: Box<dyn Channel>,
        widgets: Box<dyn WidgetFactory>,
        events_tx: UnboundedSender<EngineEvent>,
        notices_tx: UnboundedSender<Notice>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            session: Session::new(session_id),
            viewport: Viewport::new(),
            builder: BuilderConsole::new(),
            connected: false,
            channel,
            widgets,
            events_tx,
            notices_tx,
            settings,
            ttl_timer: None,
            ttl_text: constants::TTL_UNKNOWN.to_string(),
            clock_anchor: (Instant::now(), Utc::now()),
        }
    }

    /// The instance registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Viewport state.
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// Builder console output state.
    pub fn builder(&self) -> &BuilderConsole {
        &self.builder
    }

    /// Whether the channel is up, as last reported by the transport.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Current countdown text (`HH:MM:SS` or `--:--:--`).
    pub fn ttl_text(&self) -> &str {
        &self.ttl_text
    }

    /// Engine timing settings.
    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Publish a user-visible notice.
    pub fn notify(&self, notice: Notice) {
        log::debug!("[Session] Notice: {:?}", notice);
        let _ = self.notices_tx.send(notice);
    }

    /// Fail with [`SessionError::Terminated`] once the session has ended.
    pub fn ensure_alive(&self) -> Result<(), SessionError> {
        if self.session.is_alive() {
            Ok(())
        } else {
            Err(SessionError::Terminated)
        }
    }

    pub(crate) fn events_tx(&self) -> UnboundedSender<EngineEvent> {
        self.events_tx.clone()
    }

    pub(crate) fn emit(&self, event: &OutboundEvent) {
        self.channel.emit(event);
    }

    pub(crate) fn channel(&self) -> &dyn Channel {
        self.channel.as_ref()
    }

    /// Select an instance, creating and attaching its widget on first use.
    ///
    /// A new widget is opened, sized to the remembered viewport, fed the
    /// buffered output, given a flush timer, and asked to propose its own
    /// geometry through the resize debounce.
    pub fn select(&mut self, name: &str) -> Result<(), SessionError> {
        self.ensure_alive()?;
        if !self.registry.select(name) {
            return Err(SessionError::UnknownInstance(name.to_string()));
        }

        let viewport = self.viewport.current();
        let flush_interval = self.settings.flush_interval;
        let events_tx = self.events_tx.clone();

        let needs_widget = self.registry.get(name).is_some_and(|i| !i.has_widget());
        let widget = needs_widget.then(|| self.widgets.create(name));

        let Some(instance) = self.registry.get_mut(name) else {
            return Err(SessionError::UnknownInstance(name.to_string()));
        };

        let mut proposed = None;
        if let Some(widget) = widget {
            output::attach(instance, widget, viewport);
            let tick_name = name.to_string();
            input::start_flush_timer(instance, flush_interval, events_tx, move || {
                EngineEvent::FlushTick {
                    name: tick_name.clone(),
                }
            });
            proposed = instance.term.as_ref().and_then(|t| t.propose_geometry());
        }
        if let Some(term) = instance.term.as_mut() {
            term.focus();
        }

        log::debug!("[Session] Selected {}", name);
        if let Some(geometry) = proposed {
            self.propose_resize(geometry);
        }
        Ok(())
    }

    /// Feed a local geometry into the resize debounce.
    pub(crate) fn propose_resize(&mut self, geometry: Geometry) {
        let delay = self.settings.resize_debounce;
        self.viewport
            .propose(geometry, delay, self.events_tx.clone(), EngineEvent::ResizeSettled);
    }

    /// Geometry the selected widget would like, if any.
    pub(crate) fn selected_fit(&self) -> Option<Geometry> {
        self.registry
            .selected()
            .and_then(|i| i.term.as_ref())
            .and_then(|t| t.propose_geometry())
    }

    /// Resize every widget to a pushed geometry and flush pending output.
    pub(crate) fn apply_remote_resize(&mut self, geometry: Geometry) {
        self.viewport.apply_remote(geometry);
        let mut flushed = 0;
        for instance in self.registry.iter_mut() {
            flushed += output::resize_and_flush(instance, geometry);
        }
        self.builder.resize(geometry);
        log::debug!(
            "[Session] Viewport resized to {} ({} pending bytes flushed)",
            geometry,
            flushed
        );
    }

    /// Attach the builder console widget.
    pub fn attach_builder(&mut self, widget: Box<dyn TerminalWidget>) -> bool {
        let viewport = self.viewport.current();
        self.builder.attach(widget, viewport)
    }

    /// Start the one-second countdown if the expiry is known and ahead.
    pub(crate) fn start_ttl(&mut self) {
        self.refresh_ttl();
        let ahead = self
            .session
            .ttl_remaining(self.now())
            .is_some_and(|r| r > TimeDelta::zero());
        if ahead && self.ttl_timer.is_none() {
            self.ttl_timer = Some(TimerHandle::every(
                constants::TTL_TICK_INTERVAL,
                self.events_tx.clone(),
                || EngineEvent::TtlTick,
            ));
        }
    }

    /// Recompute the countdown; stops the timer at zero.
    pub(crate) fn refresh_ttl(&mut self) {
        let remaining = self.session.ttl_remaining(self.now());
        self.ttl_text = crate::lifecycle::format_ttl(remaining);
        if remaining.is_some_and(|r| r <= TimeDelta::zero()) {
            self.stop_ttl();
        }
    }

    /// Whether the expiry countdown is ticking.
    pub fn is_ttl_running(&self) -> bool {
        self.ttl_timer.as_ref().is_some_and(TimerHandle::is_active)
    }

    /// Wall-clock time advanced by the runtime's monotonic clock since the
    /// engine was built, so the countdown follows the timers that drive it.
    fn now(&self) -> DateTime<Utc> {
        let (started, wall) = self.clock_anchor;
        let elapsed = TimeDelta::from_std(started.elapsed()).unwrap_or(TimeDelta::MAX);
        wall.checked_add_signed(elapsed).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn stop_ttl(&mut self) {
        if let Some(mut timer) = self.ttl_timer.take() {
            timer.cancel();
        }
    }

    /// End the session: notify, release everything, close the channel.
    ///
    /// Only the first call has any effect.
    pub(crate) fn terminate(&mut self) {
        if !self.session.terminate() {
            return;
        }
        let released = self.registry.clear();
        self.builder.release();
        self.viewport.cancel();
        self.stop_ttl();
        self.channel.close();
        log::info!(
            "[Session] Session {} ended ({} instance(s) released)",
            self.session.id,
            released
        );
        self.notify(Notice::SessionEnded);
    }

    /// Record a connectivity transition, notifying only on change.
    pub(crate) fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            self.connected = connected;
            log::info!(
                "[Session] Channel {}",
                if connected { "connected" } else { "disconnected" }
            );
            self.notify(Notice::ConnectionChanged { connected });
        }
    }
}
