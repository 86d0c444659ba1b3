//! Per-event protocol handling.
//!
//! A [`ProtocolContext`] is created by the router for a single event and
//! dropped afterwards. Construction reads the persisted timestamp; nothing
//! else survives between events except what is written to disk or queued.
//!
//! Remote (`mqtt`) events are checked against the timestamp guard and then
//! either answered directly (PING) or translated into a local command and
//! re-enqueued as a `device` event. Local (`device`) events touch the device
//! config and produce outbound packets.

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Session;
use crate::protocol::command::{LocalCommand, RemoteCommand};
use crate::protocol::event::{Event, Origin};
use crate::protocol::packet::{InboundMessage, Outbound, Packet, PacketKind, TaskId};
use crate::store::record::{self, Record};
use crate::store::TimestampGuard;
use crate::utils::error::{ContextError, StoreError};

/// Keys never reported to the remote authority in SUP packets.
pub const SUP_FILTERED_KEYS: [&str; 2] = ["id", "uid"];

const TASK_ID_KEY: &str = "task_id";
const REQUEST_KEY: &str = "request";

/// What handling a single event amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Remote command older than the last accepted one, ignored.
    Dropped { timestamp: u64, last: u64 },
    /// WAIT pushed the guard forward.
    Paused { until: u64 },
    /// Remote command re-enqueued as a local one.
    Forwarded(LocalCommand),
    /// A packet was queued for the transport.
    Published(PacketKind),
    /// Remote update persisted and acknowledged; carries the new config.
    Applied(Record),
    /// Remote update could not be persisted; NACK sent.
    Nacked,
    /// Config re-read from disk.
    Reloaded(Record),
    /// Malformed or unknown event, dropped.
    Rejected(String),
}

pub struct ProtocolContext<'a> {
    session: &'a Session,
    timestamps: TimestampGuard,
    last_ts: u64,
    ts: u64,
    task_id: TaskId,
}

impl<'a> ProtocolContext<'a> {
    pub fn new(session: &'a Session) -> Result<Self, ContextError> {
        let timestamps = session.timestamp_guard()?;
        let last_ts = timestamps.last()?;
        Ok(Self {
            session,
            timestamps,
            last_ts,
            ts: last_ts,
            task_id: TaskId::generate(),
        })
    }

    pub fn manage(&mut self, event: Event) -> Result<Outcome, ContextError> {
        match event.origin {
            Origin::Mqtt => self.manage_remote(event),
            Origin::Device => self.manage_local(event),
            Origin::Exit => Ok(self.reject(format!("{event} is handled by the router"))),
        }
    }

    fn manage_remote(&mut self, event: Event) -> Result<Outcome, ContextError> {
        if event.command != Event::REMOTE_COMMAND {
            return Ok(self.reject(format!("unexpected transport event {event}")));
        }
        let Some(payload) = event.payload else {
            return Ok(self.reject("transport event without payload".to_string()));
        };
        let message = match InboundMessage::from_record(payload) {
            Ok(message) => message,
            Err(e) => return Ok(self.reject(format!("malformed transport payload: {e}"))),
        };
        let command: RemoteCommand = message.command.parse()?;
        let stale = message.timestamp < self.last_ts;

        match command {
            RemoteCommand::Wait => {
                let timeout = message
                    .datahold
                    .as_ref()
                    .and_then(|d| d.get("timeout"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let until = self.advance(message.timestamp.saturating_add(timeout))?;
                debug!(until, "remote asked to wait");
                Ok(Outcome::Paused { until })
            }
            _ if stale && !command.bypasses_replay_check() => {
                debug!(
                    command = %message.command,
                    timestamp = message.timestamp,
                    last = self.last_ts,
                    "ignoring message from the past"
                );
                Ok(Outcome::Dropped {
                    timestamp: message.timestamp,
                    last: self.last_ts,
                })
            }
            RemoteCommand::Ping => {
                self.advance(message.timestamp)?;
                self.publish(self.packet(PacketKind::Pong))?;
                Ok(Outcome::Published(PacketKind::Pong))
            }
            RemoteCommand::Cup => {
                self.advance(message.timestamp)?;
                let mut payload = message.datahold.unwrap_or_default();
                if let Some(task_id) = &message.task_id {
                    payload.insert(TASK_ID_KEY.to_string(), task_id.to_value());
                }
                self.forward(LocalCommand::Update, Some(payload))
            }
            RemoteCommand::Sup => {
                self.advance(message.timestamp)?;
                self.forward(LocalCommand::Sup, message.datahold)
            }
            RemoteCommand::Info => {
                self.advance(message.timestamp)?;
                self.forward(LocalCommand::Info, message.datahold)
            }
        }
    }

    fn manage_local(&mut self, event: Event) -> Result<Outcome, ContextError> {
        let Some(command) = LocalCommand::parse(&event.command) else {
            return Ok(self.reject(format!("bad event {event}")));
        };
        debug!(command = command.as_str(), "local event");

        match command {
            LocalCommand::Update => self.apply_update(event.payload),
            LocalCommand::Cup => self.request_config(event.payload.as_ref()),
            LocalCommand::Sup => self.send_config(event.payload.as_ref()),
            LocalCommand::Info => self.send_info(event.payload),
            LocalCommand::Input => self.apply_input(event.payload),
            LocalCommand::Reload | LocalCommand::Reset => {
                let mut config = self.session.device_config();
                Ok(Outcome::Reloaded(config.load()?))
            }
        }
    }

    /// Persists a remote update and answers ACK or NACK. Store failures end
    /// up in the NACK, never in the returned error.
    fn apply_update(&mut self, payload: Option<Record>) -> Result<Outcome, ContextError> {
        let mut payload = payload.unwrap_or_default();
        let task_id = payload
            .remove(TASK_ID_KEY)
            .as_ref()
            .and_then(TaskId::from_value);

        match self.persist(payload) {
            Ok(current) => {
                self.publish(self.packet(PacketKind::Ack).with_task_id(task_id))?;
                Ok(Outcome::Applied(current))
            }
            Err(e) => {
                warn!(error = %e, "cannot apply new config");
                self.publish(self.packet(PacketKind::Nack).with_task_id(task_id))?;
                Ok(Outcome::Nacked)
            }
        }
    }

    fn request_config(&mut self, payload: Option<&Record>) -> Result<Outcome, ContextError> {
        let request = match requested_keys(payload) {
            None => Value::from("all"),
            Some(keys) => {
                let current = self.session.device_config().load()?;
                let present: Vec<Value> = current
                    .keys()
                    .filter(|key| keys.contains(key))
                    .map(|key| Value::from(key.as_str()))
                    .collect();
                Value::Array(present)
            }
        };
        let mut datahold = Record::new();
        datahold.insert(REQUEST_KEY.to_string(), request);

        let packet = self
            .packet(PacketKind::Cup)
            .with_task_id(Some(self.task_id.clone()))
            .with_datahold(datahold);
        self.publish(packet)?;
        Ok(Outcome::Published(PacketKind::Cup))
    }

    fn send_config(&mut self, payload: Option<&Record>) -> Result<Outcome, ContextError> {
        let current = self.session.device_config().load()?;
        let selected = match requested_keys(payload) {
            Some(keys) => record::select(&current, &keys),
            None => current,
        };
        self.publish_sup(selected)
    }

    fn send_info(&mut self, payload: Option<Record>) -> Result<Outcome, ContextError> {
        match payload {
            Some(data) if !data.is_empty() => {
                self.publish(self.packet(PacketKind::Info).with_datahold(data))?;
                Ok(Outcome::Published(PacketKind::Info))
            }
            _ => Ok(self.reject("info event without data".to_string())),
        }
    }

    fn apply_input(&mut self, payload: Option<Record>) -> Result<Outcome, ContextError> {
        let data = match payload {
            Some(data) if !data.is_empty() => data,
            _ => return Ok(self.reject("missing data from input event".to_string())),
        };
        self.persist(data.clone())?;
        self.publish_sup(record::strip_control(data))
    }

    fn publish_sup(&mut self, mut data: Record) -> Result<Outcome, ContextError> {
        for key in SUP_FILTERED_KEYS {
            data.remove(key);
        }
        let packet = self
            .packet(PacketKind::Sup)
            .with_task_id(Some(self.task_id.clone()))
            .with_datahold(data);
        self.publish(packet)?;
        Ok(Outcome::Published(PacketKind::Sup))
    }

    /// Merges `payload` into the persisted config and writes it back.
    fn persist(&self, payload: Record) -> Result<Record, StoreError> {
        let mut config = self.session.device_config();
        config.load()?;
        config.save(Some(payload)).cloned()
    }

    fn forward(
        &mut self,
        command: LocalCommand,
        payload: Option<Record>,
    ) -> Result<Outcome, ContextError> {
        self.session
            .internal
            .send(Event::device(command.as_str(), payload))
            .map_err(|_| ContextError::QueueClosed("internal"))?;
        Ok(Outcome::Forwarded(command))
    }

    fn advance(&mut self, value: u64) -> Result<u64, ContextError> {
        self.ts = self.timestamps.advance(value)?;
        Ok(self.ts)
    }

    fn packet(&self, kind: PacketKind) -> Packet {
        Packet::new(kind, &self.session.publish, &self.session.uid, self.ts)
    }

    fn publish(&self, packet: Packet) -> Result<(), ContextError> {
        debug!(kind = %packet.kind, "queueing packet");
        self.session
            .external
            .send(Outbound::Publish(packet))
            .map_err(|_| ContextError::QueueClosed("external"))
    }

    fn reject(&self, reason: String) -> Outcome {
        warn!(reason = %reason, "bad event dropped");
        Outcome::Rejected(reason)
    }
}

/// Keys named by a `request` array; `None` means everything.
fn requested_keys(payload: Option<&Record>) -> Option<Vec<String>> {
    match payload?.get(REQUEST_KEY)? {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}
