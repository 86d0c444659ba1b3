use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::Session;
use crate::protocol::{Event, LocalCommand};
use crate::store::record::{self, CONTROL_KEYS, Record};
use crate::utils::error::DeviceError;

/// What device code holds to talk to the router.
///
/// Reads go straight to the config file; every change goes through the
/// internal queue so the router stays the only writer.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    session: Arc<Session>,
}

impl DeviceHandle {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn uid(&self) -> &str {
        &self.session.uid
    }

    /// The persisted config, or the essentials when the file is unusable.
    /// Never writes.
    pub fn current(&self) -> Result<Record, DeviceError> {
        let config = self.session.device_config();
        match config.read() {
            Ok(current) => Ok(current),
            Err(e) if e.is_corruption() => {
                debug!(error = %e, "config unreadable, using essentials");
                Ok(config.essentials().clone())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Enqueues the part of `data` that differs from the current config.
    /// Returns `None` without enqueueing when nothing changed.
    pub fn user_input(&self, data: Record) -> Result<Option<Event>, DeviceError> {
        let current = self.current()?;
        let mut changed = record::delta(&current, &record::strip_control(data.clone()));
        if changed.is_empty() {
            return Ok(None);
        }
        for key in CONTROL_KEYS {
            if let Some(marker) = data.get(key) {
                changed.insert(key.to_string(), marker.clone());
            }
        }

        let event = Event::device(LocalCommand::Input.as_str(), Some(changed));
        self.enqueue(event.clone())?;
        Ok(Some(event))
    }

    /// Sends `data` to the remote authority as an INFO packet.
    pub fn send_message(&self, data: Record) -> Result<(), DeviceError> {
        self.enqueue(Event::device(LocalCommand::Info.as_str(), Some(data)))
    }

    /// Asks the remote authority for `keys`, or for everything.
    pub fn request_config(&self, keys: Option<Vec<String>>) -> Result<(), DeviceError> {
        let request = match keys {
            Some(keys) => Value::from(keys),
            None => Value::from("all"),
        };
        let mut payload = Record::new();
        payload.insert("request".to_string(), request);
        self.enqueue(Event::device(LocalCommand::Cup.as_str(), Some(payload)))
    }

    pub fn reload(&self) -> Result<(), DeviceError> {
        self.enqueue(Event::device(LocalCommand::Reload.as_str(), None))
    }

    fn enqueue(&self, event: Event) -> Result<(), DeviceError> {
        self.session
            .internal
            .send(event)
            .map_err(|_| DeviceError::QueueClosed)
    }
}
