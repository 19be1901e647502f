//! Instance entities and the records that describe them.
//!
//! An [`InstanceRecord`] is what the backend says about an instance, either
//! in a REST response or in a push event. Records are sparse: a push for a
//! new instance carries only name, address and hostname, while a REST
//! response carries the full set. An [`Instance`] is the local entity the
//! registry owns. Besides the merged record fields it holds the client-side
//! resources bound to the instance: its rendering widget, its pending
//! output and input buffers, and its input flush timer.

use serde::{Deserialize, Serialize};

use crate::terminal::TerminalWidget;
use crate::timer::TimerHandle;

/// Backend description of an instance.
///
/// Every field except `name` is optional so that a sparse record can be
/// merged without clobbering fields it does not carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceRecord {
    /// Unique, backend-assigned name.
    pub name: String,
    /// Private address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Hostname inside the session network.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Host used to reach published ports through the proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_host: Option<String>,
    /// Owning session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Image the instance was started from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Backend instance type (`"linux"`, `"windows"`).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl InstanceRecord {
    /// A record carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the address.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Set the hostname.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}

/// Resource usage sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Memory usage as reported by the backend.
    pub mem: String,
    /// CPU usage as reported by the backend.
    pub cpu: String,
}

/// Local entity for one remote instance.
#[derive(Debug)]
pub struct Instance {
    /// Unique key.
    pub name: String,
    /// Private address.
    pub ip: Option<String>,
    /// Hostname inside the session network.
    pub hostname: Option<String>,
    /// Proxy host for published ports.
    pub proxy_host: Option<String>,
    /// Owning session.
    pub session_id: Option<String>,
    /// Image name.
    pub image: Option<String>,
    /// Backend instance type.
    pub kind: Option<String>,
    /// Latest resource usage.
    pub stats: Stats,
    /// Docker swarm manager.
    pub is_manager: bool,
    /// Kubernetes manager.
    pub is_k8s_manager: bool,
    /// Ports published on this instance.
    pub ports: Vec<u16>,
    /// Ports published by swarm services reachable through this instance.
    pub swarm_ports: Vec<u16>,
    /// Terminal connection status.
    pub status: Option<String>,
    /// Local creation placeholder awaiting backend confirmation.
    pub provisional: bool,
    pub(crate) term: Option<Box<dyn TerminalWidget>>,
    pub(crate) pending_output: Vec<u8>,
    pub(crate) pending_input: Vec<u8>,
    pub(crate) flush_timer: Option<TimerHandle>,
}

impl Instance {
    /// Fresh entity with empty buffers and no widget.
    pub fn from_record(record: InstanceRecord) -> Self {
        let mut instance = Self {
            name: record.name.clone(),
            ip: None,
            hostname: None,
            proxy_host: None,
            session_id: None,
            image: None,
            kind: None,
            stats: Stats::default(),
            is_manager: false,
            is_k8s_manager: false,
            ports: Vec::new(),
            swarm_ports: Vec::new(),
            status: None,
            provisional: false,
            term: None,
            pending_output: Vec::new(),
            pending_input: Vec::new(),
            flush_timer: None,
        };
        instance.merge(record);
        instance
    }

    /// Merge a record into this entity.
    ///
    /// Every field the record carries wins; absent fields are kept. Local
    /// resources (widget, buffers, timer) are never touched.
    pub fn merge(&mut self, record: InstanceRecord) {
        let InstanceRecord {
            name: _,
            ip,
            hostname,
            proxy_host,
            session_id,
            image,
            kind,
        } = record;

        merge_field(&mut self.ip, ip);
        merge_field(&mut self.hostname, hostname);
        merge_field(&mut self.proxy_host, proxy_host);
        merge_field(&mut self.session_id, session_id);
        merge_field(&mut self.image, image);
        merge_field(&mut self.kind, kind);
    }

    /// Whether a rendering widget is attached.
    pub fn has_widget(&self) -> bool {
        self.term.is_some()
    }

    /// Bytes received before a widget was attached.
    pub fn pending_output(&self) -> &[u8] {
        &self.pending_output
    }

    /// Input bytes waiting for the next flush.
    pub fn pending_input(&self) -> &[u8] {
        &self.pending_input
    }

    /// Whether the input flush timer is running.
    pub fn has_flush_timer(&self) -> bool {
        self.flush_timer.as_ref().is_some_and(TimerHandle::is_active)
    }

    /// Cancel the flush timer and drop the widget and buffers.
    pub(crate) fn release(&mut self) {
        if let Some(mut timer) = self.flush_timer.take() {
            timer.cancel();
        }
        self.term = None;
        self.pending_output.clear();
        self.pending_input.clear();
    }

    /// Snapshot of the record fields.
    pub fn to_record(&self) -> InstanceRecord {
        InstanceRecord {
            name: self.name.clone(),
            ip: self.ip.clone(),
            hostname: self.hostname.clone(),
            proxy_host: self.proxy_host.clone(),
            session_id: self.session_id.clone(),
            image: self.image.clone(),
            kind: self.kind.clone(),
        }
    }
}

fn merge_field(slot: &mut Option<String>, incoming: Option<String>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overwrites_carried_fields_only() {
        let mut instance = Instance::from_record(
            InstanceRecord::named("node1")
                .with_ip("10.0.0.1")
                .with_hostname("node1"),
        );
        instance.merge(InstanceRecord::named("node1").with_ip("10.0.0.2"));

        assert_eq!(instance.ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(instance.hostname.as_deref(), Some("node1"));
    }

    #[test]
    fn test_merge_keeps_buffers() {
        let mut instance = Instance::from_record(InstanceRecord::named("node1"));
        instance.pending_output.extend_from_slice(b"hello");
        instance.merge(InstanceRecord::named("node1").with_ip("10.0.0.9"));
        assert_eq!(instance.pending_output(), b"hello");
    }

    #[test]
    fn test_record_deserializes_backend_json() {
        let record: InstanceRecord = serde_json::from_str(
            r#"{
                "name": "ip10_0_0_2",
                "image": "franela/dind",
                "hostname": "node1",
                "ip": "10.0.0.2",
                "routable_ip": "10.0.0.2",
                "session_id": "abc",
                "proxy_host": "ip10-0-0-2-abc",
                "type": "linux",
                "tls": false
            }"#,
        )
        .expect("backend record");

        assert_eq!(record.name, "ip10_0_0_2");
        assert_eq!(record.kind.as_deref(), Some("linux"));
        assert_eq!(record.proxy_host.as_deref(), Some("ip10-0-0-2-abc"));
    }

    #[test]
    fn test_release_clears_local_resources() {
        let mut instance = Instance::from_record(InstanceRecord::named("node1"));
        instance.pending_output.extend_from_slice(b"out");
        instance.pending_input.extend_from_slice(b"in");
        instance.release();
        assert!(instance.pending_output().is_empty());
        assert!(instance.pending_input().is_empty());
        assert!(!instance.has_flush_timer());
    }
}
