//! The closed command vocabularies on both sides of the protocol context.

use std::str::FromStr;

use crate::utils::error::ProtocolError;

/// Commands accepted from the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    Ping,
    Wait,
    Cup,
    Sup,
    Info,
}

impl RemoteCommand {
    /// CUP and SUP are processed even when their timestamp is older than the last seen one.
    pub fn bypasses_replay_check(self) -> bool {
        matches!(self, Self::Cup | Self::Sup)
    }
}

impl FromStr for RemoteCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PING" => Ok(Self::Ping),
            "WAIT" => Ok(Self::Wait),
            "CUP" => Ok(Self::Cup),
            "SUP" => Ok(Self::Sup),
            "INFO" => Ok(Self::Info),
            other => Err(ProtocolError::UnrecognizedCommand(other.to_string())),
        }
    }
}

/// Commands carried by `device`-origin events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalCommand {
    /// Apply a remote config push and acknowledge it.
    Update,
    /// Ask the remote authority for config.
    Cup,
    /// Report the current config.
    Sup,
    /// Telemetry, sent as-is.
    Info,
    /// Local state change: persist, then report.
    Input,
    Reload,
    Reset,
}

impl LocalCommand {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "update" => Some(Self::Update),
            "cup" => Some(Self::Cup),
            "sup" => Some(Self::Sup),
            "info" => Some(Self::Info),
            "input" => Some(Self::Input),
            "reload" => Some(Self::Reload),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Cup => "cup",
            Self::Sup => "sup",
            Self::Info => "info",
            Self::Input => "input",
            Self::Reload => "reload",
            Self::Reset => "reset",
        }
    }
}
