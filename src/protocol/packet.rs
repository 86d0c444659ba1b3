//! Packet shapes exchanged with the transport worker.
//!
//! Outbound packets are published on `<publish>/<uid>/<KIND>` with a JSON
//! body `{timestamp, task_id?, datahold?}`. Inbound messages arrive on
//! `<namespace>/<uid|all>/<COMMAND>` (or `<namespace>/<COMMAND>`) with the
//! same body shape and are wrapped into `mqtt`-origin events.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::protocol::event::Event;
use crate::store::Record;
use crate::utils::error::WireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PacketKind {
    Ping,
    Pong,
    Wait,
    Cup,
    Sup,
    Info,
    Ack,
    Nack,
}

impl PacketKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Wait => "WAIT",
            Self::Cup => "CUP",
            Self::Sup => "SUP",
            Self::Info => "INFO",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlates an update with its ACK/NACK. Echoed back in the form it arrived in.
///
/// Ids that are neither a string nor an unsigned integer are kept as `Raw`,
/// so a negative or fractional id still gets its answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    Number(u64),
    Text(String),
    Raw(Value),
}

impl TaskId {
    pub fn generate() -> Self {
        Self::Text(Uuid::new_v4().simple().to_string())
    }

    /// Reads a task id out of a JSON value. `null` means no task id.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Number(n) => Some(match n.as_u64() {
                Some(n) => Self::Number(n),
                None => Self::Raw(value.clone()),
            }),
            other => Some(Self::Raw(other.clone())),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::Text(s) => Value::from(s.as_str()),
            Self::Raw(v) => v.clone(),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Raw(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub kind: PacketKind,
    pub topic: String,
    pub uid: String,
    pub timestamp: u64,
    pub task_id: Option<TaskId>,
    pub datahold: Option<Record>,
}

#[derive(Serialize)]
struct OutboundBody<'a> {
    timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_id: Option<&'a TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    datahold: Option<&'a Record>,
}

impl Packet {
    pub fn new(
        kind: PacketKind,
        topic: impl Into<String>,
        uid: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            kind,
            topic: topic.into(),
            uid: uid.into(),
            timestamp,
            task_id: None,
            datahold: None,
        }
    }

    pub fn with_task_id(mut self, task_id: Option<TaskId>) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn with_datahold(mut self, datahold: Record) -> Self {
        self.datahold = Some(datahold);
        self
    }

    pub fn wire_topic(&self) -> String {
        format!("{}/{}/{}", self.topic, self.uid, self.kind)
    }

    /// Returns the topic and JSON body to publish.
    pub fn encode(&self) -> Result<(String, String), serde_json::Error> {
        let body = serde_json::to_string(&OutboundBody {
            timestamp: self.timestamp,
            task_id: self.task_id.as_ref(),
            datahold: self.datahold.as_ref(),
        })?;
        Ok((self.wire_topic(), body))
    }
}

/// Items on the external queue, drained by the transport worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Publish(Packet),
    /// The exit event, forwarded so the transport can announce departure and stop.
    Shutdown(Event),
}

/// A remote command as carried in the payload of an `mqtt`-origin event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    pub command: String,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(deserialize_with = "timestamp_from_wire")]
    pub timestamp: u64,
    #[serde(default)]
    pub datahold: Option<Record>,
}

impl InboundMessage {
    pub fn from_record(record: Record) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(record))
    }

    pub fn into_record(self) -> Result<Record, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Record::new()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Int(u64),
    Text(String),
}

fn timestamp_from_wire<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Int(value) => Ok(value),
        RawTimestamp::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}

#[derive(Deserialize)]
struct InboundBody {
    #[serde(default)]
    task_id: Option<TaskId>,
    #[serde(deserialize_with = "timestamp_from_wire")]
    timestamp: u64,
    #[serde(default)]
    datahold: Option<Record>,
}

/// Turns a received `(topic, body)` pair into an `mqtt`-origin event.
pub fn decode_inbound(topic: &str, body: &[u8]) -> Result<Event, WireError> {
    let parts: Vec<&str> = topic.split('/').collect();
    let (namespace, uid, command) = match parts.as_slice() {
        [namespace, command] => (*namespace, None, *command),
        [namespace, uid, command] => (*namespace, Some(*uid), *command),
        _ => return Err(WireError::Topic(topic.to_string())),
    };
    if namespace.is_empty() || command.is_empty() {
        return Err(WireError::Topic(topic.to_string()));
    }

    let body: InboundBody = serde_json::from_slice(body)?;
    let message = InboundMessage {
        topic: Some(namespace.to_string()),
        uid: uid.map(str::to_string),
        command: command.to_string(),
        task_id: body.task_id,
        timestamp: body.timestamp,
        datahold: body.datahold,
    };
    Ok(Event::remote(message.into_record()?))
}
