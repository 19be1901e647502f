//! Session engine: one event loop over all session state.
//!
//! The engine owns the [`SessionCore`] (registry, session, viewport, builder
//! console, channel handle) and serializes every mutation through one
//! `tokio::select!` loop. Stimuli arrive from four places:
//!
//! ```text
//!   Transport ──InboundEvent──┐
//!   Timers ─────EngineEvent───┤
//!   REST tasks ─EngineEvent───┼──► SessionEngine::run ──► SessionCore
//!   User ───────Command───────┘                      └──► Notice channel
//! ```
//!
//! Inbound events go through the [`Dispatcher`]: built-in handlers first,
//! then observers added with [`SessionEngine::on`]. REST calls run on
//! spawned tasks and come back as [`EngineEvent::CreateCompleted`] /
//! [`EngineEvent::DeleteCompleted`], so a response and a push describing the
//! same instance converge through the same upsert no matter which lands
//! first.
//!
//! # Usage
//!
//! ```ignore
//! let (transport, inbound) = Transport::connect(url, options);
//! let (mut engine, notices) =
//!     SessionEngine::new(id, settings, Box::new(transport), inbound, api, widgets);
//! engine.bootstrap().await?;
//! engine.run(commands).await?;
//! ```

mod commands;
mod events;
mod handlers;
mod state;

pub use self::commands::Command;
pub use self::state::{EngineSettings, SessionCore};
pub use self::events::{EngineEvent, Notice};

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::api::{CreateInstanceRequest, SessionApi};
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::SessionError;
use crate::input;
use crate::protocol::{EventKind, InboundEvent, OutboundEvent};
use crate::registry::Registry;
use crate::terminal::WidgetFactory;
use crate::transport::Channel;

/// Drives one playground session.
pub struct SessionEngine {
    core: SessionCore,
    dispatcher: Dispatcher<SessionCore>,
    api: Arc<dyn SessionApi>,
    inbound_rx: mpsc::UnboundedReceiver<InboundEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("core", &self.core)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl SessionEngine {
    /// Build an engine around a channel and its inbound event stream.
    ///
    /// Returns the engine and the receiver for user-visible notices.
    pub fn new(
        session_id: impl Into<String>,
        settings: EngineSettings,
        channel: Box<dyn Channel>,
        inbound_rx: mpsc::UnboundedReceiver<InboundEvent>,
        api: Arc<dyn SessionApi>,
        widgets: Box<dyn WidgetFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let session_id = session_id.into();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let core = SessionCore::new(&session_id, settings, channel, widgets, events_tx, notices_tx);
        let mut dispatcher = Dispatcher::new();
        handlers::register(&mut dispatcher);

        let engine = Self {
            core,
            dispatcher,
            api,
            inbound_rx,
            events_rx,
        };
        (engine, notices_rx)
    }

    /// Engine state.
    pub fn core(&self) -> &SessionCore {
        &self.core
    }

    /// Mutable engine state, e.g. to attach the builder console widget.
    pub fn core_mut(&mut self) -> &mut SessionCore {
        &mut self.core
    }

    /// The instance registry.
    pub fn registry(&self) -> &Registry {
        self.core.registry()
    }

    /// Whether the channel handle has been closed.
    pub fn is_channel_closed(&self) -> bool {
        self.core.channel().is_closed()
    }

    /// Register an observer that runs after the built-in handlers.
    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&mut SessionCore, &InboundEvent) -> anyhow::Result<()> + Send + 'static,
    {
        self.dispatcher.on(kind, handler);
    }

    /// Load the session and its existing instances.
    ///
    /// Every instance is upserted, the first one is selected, and the
    /// expiry countdown starts when the backend reports timestamps.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotFound`] when the session does not exist, which
    /// ends the session view; any other request failure otherwise.
    pub async fn bootstrap(&mut self) -> Result<(), SessionError> {
        self.core.ensure_alive()?;
        let session_id = self.core.session().id.clone();
        let record = self.api.get_session(&session_id).await?;

        let core = &mut self.core;
        core.session.created_at = record.created_at;
        core.session.expires_at = record.expires_at;
        core.session.ready = record.ready.unwrap_or(true);

        for instance in record.instances.into_values() {
            core.registry.upsert(instance);
        }
        if core.registry.selected_name().is_none() {
            if let Some(first) = core.registry.names().first().cloned() {
                core.select(&first)?;
            }
        }
        core.start_ttl();

        log::info!(
            "[Session] Bootstrapped {} with {} instance(s), expires in {}",
            session_id,
            core.registry.len(),
            core.ttl_text()
        );
        Ok(())
    }

    /// Execute a local command.
    ///
    /// # Errors
    ///
    /// [`SessionError::Terminated`] after the session has ended,
    /// [`SessionError::UnknownInstance`] for commands naming an absent
    /// instance, [`SessionError::Detached`] for input to an instance whose
    /// terminal is not attached.
    pub fn execute(&mut self, command: Command) -> Result<(), SessionError> {
        self.core.ensure_alive()?;
        log::trace!("[Session] Command: {}", command.action());

        match command {
            Command::CreateInstance(request) => {
                self.create_instance(request);
                Ok(())
            }
            Command::DeleteInstance { name } => self.delete_instance(name),
            Command::Select { name } => self.core.select(&name),
            Command::Input { name, data } => {
                let instance = self
                    .core
                    .registry
                    .get_mut(&name)
                    .ok_or_else(|| SessionError::UnknownInstance(name.clone()))?;
                // Nothing flushes a detached instance, so its input would go stale.
                if !instance.has_widget() {
                    return Err(SessionError::Detached(name));
                }
                input::push(instance, &data);
                Ok(())
            }
            Command::Resize(geometry) => {
                self.core.propose_resize(geometry);
                Ok(())
            }
            Command::Fit => {
                if let Some(geometry) = self.core.selected_fit() {
                    self.core.propose_resize(geometry);
                }
                Ok(())
            }
            Command::CloseSession => {
                log::info!("[Session] Requesting session close");
                self.core.emit(&OutboundEvent::SessionClose);
                Ok(())
            }
        }
    }

    /// Insert a placeholder and start the creation request.
    fn create_instance(&mut self, request: CreateInstanceRequest) {
        let provisional = format!("pending-{}", uuid::Uuid::new_v4());
        self.core.registry.insert_placeholder(provisional.clone());
        log::debug!("[Session] Creating instance (placeholder {})", provisional);

        let api = Arc::clone(&self.api);
        let events_tx = self.core.events_tx();
        let session_id = self.core.session().id.clone();
        tokio::spawn(async move {
            let result = api.create_instance(&session_id, &request).await;
            let _ = events_tx.send(EngineEvent::CreateCompleted {
                provisional,
                result,
            });
        });
    }

    /// Start a deletion request. Local state changes only on success.
    fn delete_instance(&mut self, name: String) -> Result<(), SessionError> {
        if !self.core.registry.contains(&name) {
            return Err(SessionError::UnknownInstance(name));
        }

        let api = Arc::clone(&self.api);
        let events_tx = self.core.events_tx();
        let session_id = self.core.session().id.clone();
        tokio::spawn(async move {
            let result = api.delete_instance(&session_id, &name).await;
            let _ = events_tx.send(EngineEvent::DeleteCompleted { name, result });
        });
        Ok(())
    }

    /// Deliver one inbound event to the dispatcher.
    ///
    /// Ignored once the session has ended.
    pub fn handle_inbound(&mut self, event: InboundEvent) -> DispatchReport {
        if !self.core.session().is_alive() {
            log::trace!("[Session] Ignoring {} after termination", event.kind());
            return DispatchReport::default();
        }
        let report = self.dispatcher.dispatch(&mut self.core, &event);
        if report.failed > 0 {
            log::warn!(
                "[Session] {} handler(s) failed for {}",
                report.failed,
                event.kind()
            );
        }
        report
    }

    /// React to a timer firing or a REST call completing.
    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::FlushTick { name } => {
                let outbound = self.core.registry.get_mut(&name).and_then(input::flush);
                if let Some(outbound) = outbound {
                    if self.core.session().is_alive() {
                        self.core.emit(&outbound);
                    }
                }
            }
            EngineEvent::ResizeSettled => {
                if let Some(geometry) = self.core.viewport.settle() {
                    if self.core.session().is_alive() {
                        log::debug!("[Session] Sending viewport {}", geometry);
                        self.core.emit(&OutboundEvent::ViewportResize(geometry));
                    }
                }
            }
            EngineEvent::TtlTick => {
                if self.core.session().is_alive() {
                    self.core.refresh_ttl();
                }
            }
            EngineEvent::CreateCompleted { provisional, result } => {
                self.finish_create(&provisional, result);
            }
            EngineEvent::DeleteCompleted { name, result } => self.finish_delete(&name, result),
        }
    }

    fn finish_create(
        &mut self,
        provisional: &str,
        result: Result<crate::instance::InstanceRecord, SessionError>,
    ) {
        if !self.core.session().is_alive() {
            return;
        }
        self.core.registry.remove(provisional);

        match result {
            Ok(record) => {
                let name = record.name.clone();
                self.core.registry.upsert(record);
                if let Err(e) = self.core.select(&name) {
                    log::warn!("[Session] Could not select new instance {}: {}", name, e);
                }
            }
            Err(e) => {
                log::warn!("[Session] Instance creation failed: {}", e);
                self.core.notify(Notice::for_error("create", &e));
                // Pushes that arrived while the placeholder existed may not have been shown.
                if let Err(e) = handlers::ensure_widget_for_selection(&mut self.core) {
                    log::warn!("[Session] Could not restore selection: {:#}", e);
                }
            }
        }
    }

    fn finish_delete(&mut self, name: &str, result: Result<(), SessionError>) {
        if !self.core.session().is_alive() {
            return;
        }
        match result {
            Ok(()) => {
                self.core.registry.remove(name);
                if let Err(e) = handlers::ensure_widget_for_selection(&mut self.core) {
                    log::warn!("[Session] Could not select fallback instance: {:#}", e);
                }
            }
            Err(e) => {
                log::warn!("[Session] Deleting {} failed: {}", name, e);
                self.core.notify(Notice::for_error("delete", &e));
            }
        }
    }

    /// Handle every event that is already queued, without waiting.
    ///
    /// Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if let Ok(event) = self.inbound_rx.try_recv() {
                self.handle_inbound(event);
            } else if let Ok(event) = self.events_rx.try_recv() {
                self.handle_event(event);
            } else {
                return handled;
            }
            handled += 1;
        }
    }

    /// Wait for the next inbound or internal event and handle it.
    pub async fn step(&mut self) {
        tokio::select! {
            Some(event) = self.inbound_rx.recv() => {
                self.handle_inbound(event);
            }
            Some(event) = self.events_rx.recv() => self.handle_event(event),
            else => {}
        }
    }

    /// Run until the session ends or the command stream closes.
    ///
    /// Rejected commands are logged and published as notices.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> anyhow::Result<()> {
        log::info!("[Session] Engine running for {}", self.core.session().id);

        while self.core.session().is_alive() {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        log::info!("[Session] Command stream closed, stopping");
                        break;
                    };
                    let action = command.action();
                    if let Err(e) = self.execute(command) {
                        log::warn!("[Session] Command '{}' rejected: {}", action, e);
                        self.core.notify(Notice::for_error(action, &e));
                    }
                }
                Some(event) = self.inbound_rx.recv() => {
                    self.handle_inbound(event);
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }

        self.core.channel().close();
        Ok(())
    }
}
