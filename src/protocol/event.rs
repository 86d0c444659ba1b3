use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::Record;

/// Where an event was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Decoded from the transport.
    Mqtt,
    /// Produced by device-facing code or by the router itself.
    Device,
    /// Process shutdown.
    Exit,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mqtt => "mqtt",
            Self::Device => "device",
            Self::Exit => "exit",
        };
        f.write_str(name)
    }
}

/// The unit flowing through the internal queue. Consumed exactly once by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub origin: Origin,
    pub command: String,
    pub payload: Option<Record>,
}

impl Event {
    /// Command name the transport uses for every decoded inbound message.
    pub const REMOTE_COMMAND: &'static str = "new";

    pub fn new(origin: Origin, command: impl Into<String>, payload: Option<Record>) -> Self {
        Self {
            origin,
            command: command.into(),
            payload,
        }
    }

    pub fn remote(payload: Record) -> Self {
        Self::new(Origin::Mqtt, Self::REMOTE_COMMAND, Some(payload))
    }

    pub fn device(command: impl Into<String>, payload: Option<Record>) -> Self {
        Self::new(Origin::Device, command, payload)
    }

    pub fn exit() -> Self {
        Self::new(Origin::Exit, "exit", None)
    }

    pub fn is_exit(&self) -> bool {
        self.origin == Origin::Exit
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} event `{}`", self.origin, self.command)?;
        if let Some(payload) = &self.payload {
            write!(f, " with {} keys", payload.len())?;
        }
        f.write_str("]")
    }
}
