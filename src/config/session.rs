//! The per-process session: network identity, derived topics, queue handles
//! and store locations, built once at start and handed to every component.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::Settings;
use crate::protocol::{Event, Outbound};
use crate::store::{DeviceConfig, Record, TimestampGuard, default_essentials};
use crate::utils::error::{ConfigError, StoreError};

const SYSFS_NET: &str = "/sys/class/net";

/// `all` addresses every device in a namespace.
pub const BROADCAST_UID: &str = "all";

#[derive(Debug)]
pub struct Session {
    pub uid: String,
    pub topic: String,
    /// Namespace outbound packets are published under.
    pub publish: String,
    pub subscribe: Vec<String>,
    pub device_file: PathBuf,
    pub timestamp_file: PathBuf,
    pub essentials: Record,
    pub lock_timeout: Duration,
    pub poll_interval: Duration,
    pub internal: UnboundedSender<Event>,
    pub external: UnboundedSender<Outbound>,
    /// Reloaded or freshly applied device config, for the device-facing code.
    pub device_state: UnboundedSender<Record>,
}

/// Receiving ends of the session channels.
#[derive(Debug)]
pub struct SessionQueues {
    pub internal: UnboundedReceiver<Event>,
    pub external: UnboundedReceiver<Outbound>,
    pub device_state: UnboundedReceiver<Record>,
}

impl Session {
    /// Resolves the device identity and opens the session channels.
    pub fn bootstrap(settings: &Settings) -> Result<(Arc<Self>, SessionQueues), ConfigError> {
        let iface = settings
            .device
            .iface
            .as_deref()
            .filter(|iface| !iface.trim().is_empty())
            .ok_or(ConfigError::MissingKey("device.iface"))?;

        let uid = match settings.device.uid.as_deref() {
            Some(uid) if !uid.is_empty() => uid.to_string(),
            _ => interface_uid(Path::new(SYSFS_NET), iface)?,
        };

        Ok(Self::with_identity(uid, settings))
    }

    /// Builds a session for an already known uid.
    pub fn with_identity(
        uid: impl Into<String>,
        settings: &Settings,
    ) -> (Arc<Self>, SessionQueues) {
        let uid = uid.into();
        let topic = settings.device.topic.clone();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (external_tx, external_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = mpsc::unbounded_channel();

        let session = Self {
            publish: format!("ask/{topic}"),
            subscribe: vec![
                format!("{topic}/{BROADCAST_UID}/#"),
                format!("{topic}/{uid}/#"),
            ],
            uid,
            topic,
            device_file: settings.store.device_file.clone(),
            timestamp_file: settings.store.timestamp_file.clone(),
            essentials: default_essentials(),
            lock_timeout: settings.store.lock_timeout(),
            poll_interval: settings.router.poll_interval(),
            internal: internal_tx,
            external: external_tx,
            device_state: state_tx,
        };
        let queues = SessionQueues {
            internal: internal_rx,
            external: external_rx,
            device_state: state_rx,
        };
        (Arc::new(session), queues)
    }

    /// A fresh, not yet loaded handle on the device config file.
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig::new(&self.device_file, self.essentials.clone())
            .with_lock_timeout(self.lock_timeout)
    }

    pub fn timestamp_guard(&self) -> Result<TimestampGuard, StoreError> {
        TimestampGuard::open(&self.timestamp_file, self.lock_timeout)
    }

    /// The session is rebuilt on every start and is never persisted.
    pub fn write(&self) -> Result<(), ConfigError> {
        Err(ConfigError::ReadOnly)
    }
}

/// Device uid derived from the interface's hardware address, `:` removed.
pub fn interface_uid(sys_net: &Path, iface: &str) -> Result<String, ConfigError> {
    let path = sys_net.join(iface).join("address");
    let address = fs::read_to_string(&path).map_err(|source| ConfigError::Interface {
        iface: iface.to_string(),
        source,
    })?;
    let uid: String = address
        .trim()
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if uid.is_empty() {
        return Err(ConfigError::Interface {
            iface: iface.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidData, "empty hardware address"),
        });
    }
    Ok(uid)
}
