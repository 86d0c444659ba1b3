
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::{Session, SessionQueues, Settings};
use crate::protocol::{Event, InboundMessage, TaskId};
use crate::store::Record;

pub(crate) const TEST_UID: &str = "a1b2c3d4e5f6";

/// A session whose stores live in `dir`, with short lock and poll intervals.
pub(crate) fn test_session(dir: &TempDir) -> (Arc<Session>, SessionQueues) {
    let mut settings = Settings::default();
    settings.device.topic = "lock".to_string();
    settings.store.device_file = dir.path().join("device.yml");
    settings.store.timestamp_file = dir.path().join("ts");
    settings.store.lock_timeout_ms = 200;
    settings.router.poll_interval_ms = 10;
    Session::with_identity(TEST_UID, &settings)
}

pub(crate) fn rec(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// An `mqtt`-origin event as the transport would enqueue it.
pub(crate) fn remote(
    command: &str,
    timestamp: u64,
    task_id: Option<TaskId>,
    datahold: Option<Value>,
) -> Event {
    let message = InboundMessage {
        topic: Some("lock".to_string()),
        uid: Some(TEST_UID.to_string()),
        command: command.to_string(),
        task_id,
        timestamp,
        datahold: datahold.map(rec),
    };
    Event::remote(message.into_record().unwrap())
}

/// Polls `rx` until an item arrives or `timeout` elapses.
pub(crate) fn wait_for<T>(rx: &mut UnboundedReceiver<T>, timeout: Duration) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(item) = rx.try_recv() {
            return Some(item);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
