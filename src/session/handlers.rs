//! Built-in handlers for inbound events.
//!
//! Registered first, so embedder observers added through
//! [`SessionEngine::on`](super::SessionEngine::on) always see state that
//! already reflects the event.

use crate::dispatcher::Dispatcher;
use crate::instance::Stats;
use crate::output;
use crate::protocol::{EventKind, InboundEvent};

use super::state::SessionCore;

/// Register the state-transition handler for every event kind.
pub(crate) fn register(dispatcher: &mut Dispatcher<SessionCore>) {
    dispatcher.on(EventKind::TerminalOut, |core, event| {
        if let InboundEvent::TerminalOut { name, data } = event {
            output::route(&mut core.registry, name, data);
        }
        Ok(())
    });

    dispatcher.on(EventKind::InstanceNew, |core, event| {
        if let InboundEvent::InstanceNew(record) = event {
            core.registry.upsert(record.clone());
            // First confirmed instance in the session becomes the visible one.
            let confirmed = core.registry.iter().filter(|i| !i.provisional).count();
            let nothing_shown = core.registry.selected().map_or(true, |i| i.provisional);
            if confirmed == 1 && nothing_shown {
                core.select(&record.name)?;
            }
        }
        Ok(())
    });

    dispatcher.on(EventKind::InstanceDelete, |core, event| {
        if let InboundEvent::InstanceDelete { name } = event {
            if core.registry.remove(name).is_none() {
                log::debug!("[Session] Delete push for unknown instance {}", name);
            }
            ensure_widget_for_selection(core)?;
        }
        Ok(())
    });

    dispatcher.on(EventKind::ViewportResize, |core, event| {
        if let InboundEvent::ViewportResize(geometry) = event {
            core.apply_remote_resize(*geometry);
        }
        Ok(())
    });

    dispatcher.on(EventKind::SessionEnd, |core, _event| {
        core.terminate();
        Ok(())
    });

    dispatcher.on(EventKind::SessionReady, |core, event| {
        if let InboundEvent::SessionReady { ready } = event {
            core.session.ready = *ready;
            log::info!("[Session] Session ready: {}", ready);
        }
        Ok(())
    });

    dispatcher.on(EventKind::BuilderOut, |core, event| {
        if let InboundEvent::BuilderOut { data } = event {
            core.builder.write(data);
        }
        Ok(())
    });

    dispatcher.on(EventKind::TerminalStatus, |core, event| {
        if let InboundEvent::TerminalStatus { name, status } = event {
            core.registry
                .update(name, |i| i.status = Some(status.clone()));
        }
        Ok(())
    });

    dispatcher.on(EventKind::InstanceStats, |core, event| {
        if let InboundEvent::InstanceStats(report) = event {
            core.registry.update(&report.instance, |i| {
                i.stats = Stats {
                    mem: report.mem.clone(),
                    cpu: report.cpu.clone(),
                };
            });
        }
        Ok(())
    });

    dispatcher.on(EventKind::SwarmStatus, |core, event| {
        if let InboundEvent::SwarmStatus(report) = event {
            core.registry
                .update(&report.instance, |i| i.is_manager = report.is_manager);
        }
        Ok(())
    });

    dispatcher.on(EventKind::K8sStatus, |core, event| {
        if let InboundEvent::K8sStatus(report) = event {
            core.registry
                .update(&report.instance, |i| i.is_k8s_manager = report.is_manager);
        }
        Ok(())
    });

    dispatcher.on(EventKind::DockerPorts, |core, event| {
        if let InboundEvent::DockerPorts(report) = event {
            core.registry
                .update(&report.instance, |i| i.ports = report.ports.clone());
        }
        Ok(())
    });

    dispatcher.on(EventKind::SwarmPorts, |core, event| {
        if let InboundEvent::SwarmPorts(report) = event {
            for name in &report.instances {
                core.registry
                    .update(name, |i| i.swarm_ports = report.ports.clone());
            }
        }
        Ok(())
    });

    dispatcher.on(EventKind::Connected, |core, _event| {
        core.set_connected(true);
        Ok(())
    });

    dispatcher.on(EventKind::Disconnected, |core, _event| {
        core.set_connected(false);
        Ok(())
    });
}

/// Make sure a confirmed instance is shown whenever one exists.
///
/// Keeps a confirmed selection (attaching its widget if needed); otherwise
/// selects the first confirmed instance in display order.
pub(crate) fn ensure_widget_for_selection(core: &mut SessionCore) -> anyhow::Result<()> {
    let target = match core.registry.selected() {
        Some(selected) if !selected.provisional => {
            (!selected.has_widget()).then(|| selected.name.clone())
        }
        _ => core
            .registry
            .iter()
            .find(|i| !i.provisional)
            .map(|i| i.name.clone()),
    };
    if let Some(name) = target {
        core.select(&name)?;
    }
    Ok(())
}
