//! Wire protocol for the session channel.
//!
//! Every frame on the socket is a JSON text message shaped as an
//! [`Envelope`]: `{"name": "<event name>", "args": [...]}`. Inbound envelopes
//! are decoded exactly once, here, into the closed set of [`InboundEvent`]
//! variants; handlers downstream never touch raw JSON.
//!
//! # Event names
//!
//! The backend renamed its events over time (`terminal out` became
//! `instance terminal out`, and so on). Decoding accepts both spellings.
//! Encoding picks one set according to [`ProtocolVersion`].
//!
//! # Shape validation
//!
//! Arity and argument types are checked per event. Missing or mistyped
//! arguments produce [`ProtocolError::BadArguments`]; extra trailing
//! arguments are ignored. Geometry numbers are accepted as integers or floats
//! because the backend serializes them from floating point.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::instance::InstanceRecord;
use crate::terminal::Geometry;

/// Raw `{name, args}` frame as it travels over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name, e.g. `"instance terminal out"`.
    pub name: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Envelope {
    /// Build an envelope from a name and positional arguments.
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Errors raised while decoding a frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame was not a valid `{name, args}` JSON object.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The event name is not part of the catalogue.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The arguments did not match the event's schema.
    #[error("bad arguments for '{event}': {reason}")]
    BadArguments {
        /// Event name as received.
        event: String,
        /// What was wrong.
        reason: String,
    },
}

/// Which set of outbound event names to speak.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Short names: `terminal in`, `viewport resize`.
    Legacy,
    /// Instance-scoped names: `instance terminal in`, `instance viewport resize`.
    #[default]
    Current,
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "current" => Ok(Self::Current),
            other => Err(format!("unknown protocol version: {other}")),
        }
    }
}

/// Discriminant of [`InboundEvent`], used as the dispatcher key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Terminal output for one instance.
    TerminalOut,
    /// An instance was created.
    InstanceNew,
    /// An instance was deleted.
    InstanceDelete,
    /// The shared viewport geometry changed.
    ViewportResize,
    /// The session was terminated.
    SessionEnd,
    /// The session finished (or restarted) provisioning.
    SessionReady,
    /// Output of the session builder console.
    BuilderOut,
    /// Terminal connection status of one instance.
    TerminalStatus,
    /// Resource usage of one instance.
    InstanceStats,
    /// Docker swarm role of one instance.
    SwarmStatus,
    /// Kubernetes role of one instance.
    K8sStatus,
    /// Published ports of one instance.
    DockerPorts,
    /// Swarm-wide published ports.
    SwarmPorts,
    /// The channel (re)connected.
    Connected,
    /// The channel dropped.
    Disconnected,
}

impl EventKind {
    /// Resolve a wire name (either spelling) to a kind.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "terminal out" | "instance terminal out" => Self::TerminalOut,
            "new instance" | "instance new" => Self::InstanceNew,
            "delete instance" | "instance delete" => Self::InstanceDelete,
            "viewport resize" | "instance viewport resize" => Self::ViewportResize,
            "session end" => Self::SessionEnd,
            "session ready" => Self::SessionReady,
            "session builder out" => Self::BuilderOut,
            "instance terminal status" => Self::TerminalStatus,
            "instance stats" => Self::InstanceStats,
            "instance docker swarm status" => Self::SwarmStatus,
            "instance k8s status" => Self::K8sStatus,
            "instance docker ports" => Self::DockerPorts,
            "instance docker swarm ports" => Self::SwarmPorts,
            "connect" => Self::Connected,
            "connect_error" => Self::Disconnected,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// `instance stats` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatsReport {
    /// Instance name.
    pub instance: String,
    /// Memory usage, preformatted by the backend.
    #[serde(default)]
    pub mem: String,
    /// CPU usage, preformatted by the backend.
    #[serde(default)]
    pub cpu: String,
}

/// `instance docker swarm status` / `instance k8s status` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleReport {
    /// Instance name.
    pub instance: String,
    /// Whether the instance is a cluster manager.
    #[serde(default)]
    pub is_manager: bool,
    /// Whether the instance is a cluster worker.
    #[serde(default)]
    pub is_worker: bool,
}

/// `instance docker ports` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortsReport {
    /// Instance name.
    pub instance: String,
    /// Published ports.
    #[serde(default)]
    pub ports: Vec<u16>,
}

/// `instance docker swarm ports` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SwarmPortsReport {
    /// Every instance taking part in the swarm.
    #[serde(default)]
    pub instances: Vec<String>,
    /// Ports published by swarm services.
    #[serde(default)]
    pub ports: Vec<u16>,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Bytes produced by an instance's terminal.
    TerminalOut {
        /// Instance name.
        name: String,
        /// Raw terminal bytes.
        data: Vec<u8>,
    },
    /// A new instance exists (possibly created by another client).
    InstanceNew(InstanceRecord),
    /// An instance was deleted.
    InstanceDelete {
        /// Instance name.
        name: String,
    },
    /// The shared viewport changed; every terminal should follow.
    ViewportResize(Geometry),
    /// The session was terminated.
    SessionEnd,
    /// Session readiness toggled.
    SessionReady {
        /// `true` once the backend is done provisioning.
        ready: bool,
    },
    /// Output of the session builder console.
    BuilderOut {
        /// Raw console bytes.
        data: Vec<u8>,
    },
    /// Terminal connection status changed.
    TerminalStatus {
        /// Instance name.
        name: String,
        /// Backend status string (e.g. `"connect"`, `"reconnect"`).
        status: String,
    },
    /// Resource usage sample.
    InstanceStats(StatsReport),
    /// Docker swarm role update.
    SwarmStatus(RoleReport),
    /// Kubernetes role update.
    K8sStatus(RoleReport),
    /// Published ports update.
    DockerPorts(PortsReport),
    /// Swarm-wide ports update.
    SwarmPorts(SwarmPortsReport),
    /// Channel connected.
    Connected,
    /// Channel disconnected.
    Disconnected,
}

impl InboundEvent {
    /// Decode a raw text frame.
    pub fn decode_frame(text: &str) -> Result<Self, ProtocolError> {
        Self::from_envelope(&Envelope::decode(text)?)
    }

    /// Validate an envelope against the event catalogue.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let kind = EventKind::from_name(&envelope.name)
            .ok_or_else(|| ProtocolError::UnknownEvent(envelope.name.clone()))?;
        let args = Args {
            event: &envelope.name,
            values: &envelope.args,
        };

        let event = match kind {
            EventKind::TerminalOut => Self::TerminalOut {
                name: args.string(0)?,
                data: args.string(1)?.into_bytes(),
            },
            EventKind::InstanceNew => {
                let mut record = InstanceRecord::named(args.string(0)?);
                record.ip = args.opt_string(1)?;
                record.hostname = args.opt_string(2)?;
                record.proxy_host = args.opt_string(3)?;
                Self::InstanceNew(record)
            }
            EventKind::InstanceDelete => Self::InstanceDelete {
                name: args.string(0)?,
            },
            EventKind::ViewportResize => {
                Self::ViewportResize(Geometry::new(args.dimension(0)?, args.dimension(1)?))
            }
            EventKind::SessionEnd => Self::SessionEnd,
            EventKind::SessionReady => Self::SessionReady {
                ready: args.boolean(0)?,
            },
            EventKind::BuilderOut => Self::BuilderOut {
                data: args.string(0)?.into_bytes(),
            },
            EventKind::TerminalStatus => Self::TerminalStatus {
                name: args.string(0)?,
                status: args.string(1)?,
            },
            EventKind::InstanceStats => Self::InstanceStats(args.object(0)?),
            EventKind::SwarmStatus => Self::SwarmStatus(args.object(0)?),
            EventKind::K8sStatus => Self::K8sStatus(args.object(0)?),
            EventKind::DockerPorts => Self::DockerPorts(args.object(0)?),
            EventKind::SwarmPorts => Self::SwarmPorts(args.object(0)?),
            EventKind::Connected => Self::Connected,
            EventKind::Disconnected => Self::Disconnected,
        };
        Ok(event)
    }

    /// Dispatcher key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TerminalOut { .. } => EventKind::TerminalOut,
            Self::InstanceNew(_) => EventKind::InstanceNew,
            Self::InstanceDelete { .. } => EventKind::InstanceDelete,
            Self::ViewportResize(_) => EventKind::ViewportResize,
            Self::SessionEnd => EventKind::SessionEnd,
            Self::SessionReady { .. } => EventKind::SessionReady,
            Self::BuilderOut { .. } => EventKind::BuilderOut,
            Self::TerminalStatus { .. } => EventKind::TerminalStatus,
            Self::InstanceStats(_) => EventKind::InstanceStats,
            Self::SwarmStatus(_) => EventKind::SwarmStatus,
            Self::K8sStatus(_) => EventKind::K8sStatus,
            Self::DockerPorts(_) => EventKind::DockerPorts,
            Self::SwarmPorts(_) => EventKind::SwarmPorts,
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
        }
    }
}

/// A message the client sends to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Coalesced keyboard input for one instance.
    TerminalIn {
        /// Instance name.
        name: String,
        /// Input text.
        data: String,
    },
    /// The local viewport changed.
    ViewportResize(Geometry),
    /// Ask the backend to end the session.
    SessionClose,
}

impl OutboundEvent {
    /// Wire name for this event in the given protocol version.
    pub fn name(&self, version: ProtocolVersion) -> &'static str {
        match (self, version) {
            (Self::TerminalIn { .. }, ProtocolVersion::Legacy) => "terminal in",
            (Self::TerminalIn { .. }, ProtocolVersion::Current) => "instance terminal in",
            (Self::ViewportResize(_), ProtocolVersion::Legacy) => "viewport resize",
            (Self::ViewportResize(_), ProtocolVersion::Current) => "instance viewport resize",
            (Self::SessionClose, _) => "session close",
        }
    }

    /// Build the wire envelope.
    pub fn to_envelope(&self, version: ProtocolVersion) -> Envelope {
        let args = match self {
            Self::TerminalIn { name, data } => {
                vec![Value::from(name.as_str()), Value::from(data.as_str())]
            }
            Self::ViewportResize(geometry) => {
                vec![Value::from(geometry.cols), Value::from(geometry.rows)]
            }
            Self::SessionClose => Vec::new(),
        };
        Envelope::new(self.name(version), args)
    }
}

/// Positional argument accessor bound to one envelope.
struct Args<'a> {
    event: &'a str,
    values: &'a [Value],
}

impl Args<'_> {
    fn bad(&self, reason: impl Into<String>) -> ProtocolError {
        ProtocolError::BadArguments {
            event: self.event.to_string(),
            reason: reason.into(),
        }
    }

    fn get(&self, idx: usize) -> Result<&Value, ProtocolError> {
        self.values
            .get(idx)
            .ok_or_else(|| self.bad(format!("missing argument {idx}")))
    }

    fn string(&self, idx: usize) -> Result<String, ProtocolError> {
        self.get(idx)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.bad(format!("argument {idx} is not a string")))
    }

    fn opt_string(&self, idx: usize) -> Result<Option<String>, ProtocolError> {
        match self.values.get(idx) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.bad(format!("argument {idx} is not a string"))),
        }
    }

    fn boolean(&self, idx: usize) -> Result<bool, ProtocolError> {
        self.get(idx)?
            .as_bool()
            .ok_or_else(|| self.bad(format!("argument {idx} is not a boolean")))
    }

    fn dimension(&self, idx: usize) -> Result<u16, ProtocolError> {
        let value = self.get(idx)?;
        let number = value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| self.bad(format!("argument {idx} is not a dimension")))?;
        u16::try_from(number).map_err(|e| self.bad(format!("argument {idx}: {e}")))
    }

    fn object<T: DeserializeOwned>(&self, idx: usize) -> Result<T, ProtocolError> {
        serde_json::from_value(self.get(idx)?.clone())
            .map_err(|e| self.bad(format!("argument {idx}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(name: &str, args: Value) -> String {
        json!({ "name": name, "args": args }).to_string()
    }

    #[test]
    fn test_decode_terminal_out_both_spellings() {
        for name in ["terminal out", "instance terminal out"] {
            let event = InboundEvent::decode_frame(&frame(name, json!(["node1", "ls\r\n"])))
                .expect("valid frame");
            assert_eq!(
                event,
                InboundEvent::TerminalOut {
                    name: "node1".into(),
                    data: b"ls\r\n".to_vec(),
                }
            );
        }
    }

    #[test]
    fn test_decode_instance_new_without_proxy_host() {
        let event = InboundEvent::decode_frame(&frame(
            "new instance",
            json!(["node1", "10.0.0.2", "node1.local"]),
        ))
        .expect("valid frame");

        let InboundEvent::InstanceNew(record) = event else {
            panic!("expected InstanceNew, got {event:?}");
        };
        assert_eq!(record.name, "node1");
        assert_eq!(record.ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(record.hostname.as_deref(), Some("node1.local"));
        assert_eq!(record.proxy_host, None);
    }

    #[test]
    fn test_decode_viewport_accepts_floats() {
        let event =
            InboundEvent::decode_frame(&frame("instance viewport resize", json!([80.0, 24])))
                .expect("valid frame");
        assert_eq!(event, InboundEvent::ViewportResize(Geometry::new(80, 24)));
    }

    #[test]
    fn test_decode_viewport_rejects_negative() {
        let err = InboundEvent::decode_frame(&frame("viewport resize", json!([-1, 24])))
            .expect_err("negative columns");
        assert!(matches!(err, ProtocolError::BadArguments { .. }));
    }

    #[test]
    fn test_decode_unknown_event() {
        let err = InboundEvent::decode_frame(&frame("instance image pulled", json!([])))
            .expect_err("unknown");
        assert_eq!(
            err,
            ProtocolError::UnknownEvent("instance image pulled".into())
        );
    }

    #[test]
    fn test_decode_missing_argument() {
        let err = InboundEvent::decode_frame(&frame("instance delete", json!([])))
            .expect_err("missing name");
        assert!(matches!(err, ProtocolError::BadArguments { ref event, .. } if event == "instance delete"));
    }

    #[test]
    fn test_decode_malformed_json() {
        let err = InboundEvent::decode_frame("{not json").expect_err("malformed");
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_decode_structured_payloads() {
        let stats = InboundEvent::decode_frame(&frame(
            "instance stats",
            json!([{ "instance": "node1", "mem": "12.5%", "cpu": "3.1%" }]),
        ))
        .expect("stats");
        assert_eq!(stats.kind(), EventKind::InstanceStats);

        let swarm = InboundEvent::decode_frame(&frame(
            "instance docker swarm ports",
            json!([{ "instances": ["node1", "node2"], "ports": [8080] }]),
        ))
        .expect("swarm ports");
        assert_eq!(
            swarm,
            InboundEvent::SwarmPorts(SwarmPortsReport {
                instances: vec!["node1".into(), "node2".into()],
                ports: vec![8080],
            })
        );
    }

    #[test]
    fn test_decode_session_events() {
        assert_eq!(
            InboundEvent::decode_frame(&frame("session end", json!([]))).expect("end"),
            InboundEvent::SessionEnd
        );
        assert_eq!(
            InboundEvent::decode_frame(&frame("session ready", json!([true]))).expect("ready"),
            InboundEvent::SessionReady { ready: true }
        );
        // args may be omitted entirely
        assert_eq!(
            InboundEvent::decode_frame(r#"{"name":"connect"}"#).expect("connect"),
            InboundEvent::Connected
        );
    }

    #[test]
    fn test_outbound_names_follow_version() {
        let input = OutboundEvent::TerminalIn {
            name: "node1".into(),
            data: "ls\n".into(),
        };
        assert_eq!(input.name(ProtocolVersion::Legacy), "terminal in");
        assert_eq!(input.name(ProtocolVersion::Current), "instance terminal in");

        let envelope = OutboundEvent::ViewportResize(Geometry::new(120, 40))
            .to_envelope(ProtocolVersion::Current);
        assert_eq!(envelope.name, "instance viewport resize");
        assert_eq!(envelope.args, vec![json!(120), json!(40)]);

        let close = OutboundEvent::SessionClose.to_envelope(ProtocolVersion::Legacy);
        assert_eq!(close.encode().expect("encode"), r#"{"name":"session close","args":[]}"#);
    }

    #[test]
    fn test_protocol_version_from_str() {
        assert_eq!("Legacy".parse::<ProtocolVersion>(), Ok(ProtocolVersion::Legacy));
        assert_eq!("current".parse::<ProtocolVersion>(), Ok(ProtocolVersion::Current));
        assert!("v3".parse::<ProtocolVersion>().is_err());
    }
}
