use super::command::{LocalCommand, RemoteCommand};
use super::context::{Outcome, ProtocolContext};
use super::event::{Event, Origin};
use super::packet::{InboundMessage, Outbound, Packet, PacketKind, TaskId, decode_inbound};
use crate::config::{Session, SessionQueues, Settings};
use crate::tests::{TEST_UID, rec, remote, test_session};
use crate::utils::error::{ContextError, ProtocolError, WireError};

use serde_json::{Value, json};
use std::fs;
use tempfile::tempdir;

fn manage(session: &Session, event: Event) -> Result<Outcome, ContextError> {
    ProtocolContext::new(session).unwrap().manage(event)
}

fn set_last(session: &Session, value: u64) {
    session.timestamp_guard().unwrap().advance(value).unwrap();
}

fn last(session: &Session) -> u64 {
    session.timestamp_guard().unwrap().last().unwrap()
}

fn seed(session: &Session, value: Value) {
    let mut config = session.device_config();
    config.load().unwrap();
    config.save(Some(rec(value))).unwrap();
}

fn published(queues: &mut SessionQueues) -> Vec<Packet> {
    let mut packets = Vec::new();
    while let Ok(item) = queues.external.try_recv() {
        match item {
            Outbound::Publish(packet) => packets.push(packet),
            Outbound::Shutdown(event) => panic!("unexpected shutdown {event}"),
        }
    }
    packets
}

#[test]
fn test_remote_command_parsing() {
    assert_eq!("PING".parse::<RemoteCommand>(), Ok(RemoteCommand::Ping));
    assert_eq!(
        "ping".parse::<RemoteCommand>(),
        Err(ProtocolError::UnrecognizedCommand("ping".to_string()))
    );
    assert!(RemoteCommand::Cup.bypasses_replay_check());
    assert!(RemoteCommand::Sup.bypasses_replay_check());
    assert!(!RemoteCommand::Ping.bypasses_replay_check());
}

#[test]
fn test_local_command_names() {
    for name in ["update", "cup", "sup", "info", "input", "reload", "reset"] {
        let command = LocalCommand::parse(name).unwrap();
        assert_eq!(command.as_str(), name);
    }
    assert_eq!(LocalCommand::parse("UPDATE"), None);
}

#[test]
fn test_stale_ping_is_dropped() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);
    set_last(&session, 100);

    let outcome = manage(&session, remote("PING", 50, None, None)).unwrap();

    assert_eq!(
        outcome,
        Outcome::Dropped {
            timestamp: 50,
            last: 100
        }
    );
    assert_eq!(last(&session), 100);
    assert!(published(&mut queues).is_empty());
}

#[test]
fn test_ping_answers_pong() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);
    set_last(&session, 100);

    let outcome = manage(&session, remote("PING", 150, None, None)).unwrap();

    assert_eq!(outcome, Outcome::Published(PacketKind::Pong));
    assert_eq!(last(&session), 150);
    let packets = published(&mut queues);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind, PacketKind::Pong);
    assert_eq!(packets[0].timestamp, 150);
    assert_eq!(packets[0].wire_topic(), format!("ask/lock/{TEST_UID}/PONG"));
}

#[test]
fn test_equal_timestamp_is_accepted() {
    let dir = tempdir().unwrap();
    let (session, _queues) = test_session(&dir);
    set_last(&session, 100);

    let outcome = manage(&session, remote("PING", 100, None, None)).unwrap();
    assert_eq!(outcome, Outcome::Published(PacketKind::Pong));
}

#[test]
fn test_wait_advances_by_timeout() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);

    let outcome = manage(
        &session,
        remote("WAIT", 100, None, Some(json!({"timeout": 20}))),
    )
    .unwrap();
    assert_eq!(outcome, Outcome::Paused { until: 120 });
    assert_eq!(last(&session), 120);

    // Anything stamped before the pause expires is ignored.
    let info = remote("INFO", 110, None, Some(json!({"note": "late"})));
    let outcome = manage(&session, info).unwrap();
    assert!(matches!(outcome, Outcome::Dropped { .. }));
    assert!(published(&mut queues).is_empty());
    assert!(queues.internal.try_recv().is_err());
}

#[test]
fn test_wait_without_timeout() {
    let dir = tempdir().unwrap();
    let (session, _queues) = test_session(&dir);

    let outcome = manage(&session, remote("WAIT", 42, None, None)).unwrap();
    assert_eq!(outcome, Outcome::Paused { until: 42 });
}

#[test]
fn test_stale_cup_is_forwarded() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);
    set_last(&session, 100);

    let outcome = manage(
        &session,
        remote(
            "CUP",
            50,
            Some(TaskId::from("t-1")),
            Some(json!({"color": "red"})),
        ),
    )
    .unwrap();

    assert_eq!(outcome, Outcome::Forwarded(LocalCommand::Update));
    assert_eq!(last(&session), 50);
    let forwarded = queues.internal.try_recv().unwrap();
    assert_eq!(forwarded.origin, Origin::Device);
    assert_eq!(forwarded.command, "update");
    assert_eq!(
        forwarded.payload,
        Some(rec(json!({"color": "red", "task_id": "t-1"})))
    );
}

#[test]
fn test_stale_info_dropped_but_sup_processed() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);
    set_last(&session, 100);

    let info = remote("INFO", 50, None, Some(json!({"note": "old"})));
    assert!(matches!(
        manage(&session, info).unwrap(),
        Outcome::Dropped { .. }
    ));
    assert!(queues.internal.try_recv().is_err());
    assert_eq!(last(&session), 100);

    let outcome = manage(&session, remote("SUP", 50, None, None)).unwrap();
    assert_eq!(outcome, Outcome::Forwarded(LocalCommand::Sup));
    assert_eq!(queues.internal.try_recv().unwrap().command, "sup");
}

#[test]
fn test_sup_and_info_are_forwarded() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);

    let outcome = manage(&session, remote("SUP", 1, None, None)).unwrap();
    assert_eq!(outcome, Outcome::Forwarded(LocalCommand::Sup));
    let outcome = manage(
        &session,
        remote("INFO", 2, None, Some(json!({"note": "hi"}))),
    )
    .unwrap();
    assert_eq!(outcome, Outcome::Forwarded(LocalCommand::Info));

    let sup = queues.internal.try_recv().unwrap();
    assert_eq!(sup.command, "sup");
    assert_eq!(sup.payload, None);
    let info = queues.internal.try_recv().unwrap();
    assert_eq!(info.command, "info");
    assert_eq!(info.payload, Some(rec(json!({"note": "hi"}))));
}

#[test]
fn test_unrecognized_remote_command_is_an_error() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);
    set_last(&session, 10);

    let result = manage(&session, remote("REBOOT", 20, None, None));

    assert!(matches!(
        result,
        Err(ContextError::Protocol(ProtocolError::UnrecognizedCommand(ref c))) if c == "REBOOT"
    ));
    assert_eq!(last(&session), 10);
    assert!(published(&mut queues).is_empty());
}

#[test]
fn test_malformed_remote_events_are_rejected() {
    let dir = tempdir().unwrap();
    let (session, _queues) = test_session(&dir);

    let wrong_command = Event::new(Origin::Mqtt, "old", Some(rec(json!({}))));
    assert!(matches!(
        manage(&session, wrong_command).unwrap(),
        Outcome::Rejected(_)
    ));

    let no_payload = Event::new(Origin::Mqtt, Event::REMOTE_COMMAND, None);
    assert!(matches!(
        manage(&session, no_payload).unwrap(),
        Outcome::Rejected(_)
    ));

    let no_timestamp = Event::remote(rec(json!({"command": "PING"})));
    assert!(matches!(
        manage(&session, no_timestamp).unwrap(),
        Outcome::Rejected(_)
    ));
}

#[test]
fn test_update_persists_and_acks() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);
    set_last(&session, 7);

    let payload = rec(json!({"color": "red", "task_id": 99}));
    let outcome = manage(&session, Event::device("update", Some(payload))).unwrap();

    let expected = rec(json!({"assets": {}, "color": "red"}));
    assert_eq!(outcome, Outcome::Applied(expected.clone()));
    assert_eq!(session.device_config().load().unwrap(), expected);

    let on_disk = fs::read_to_string(&session.device_file).unwrap();
    assert!(!on_disk.contains("task_id"));

    let packets = published(&mut queues);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind, PacketKind::Ack);
    assert_eq!(packets[0].task_id, Some(TaskId::Number(99)));
    assert_eq!(packets[0].timestamp, 7);
}

#[test]
fn test_update_failure_nacks() {
    let dir = tempdir().unwrap();
    let mut settings = Settings::default();
    let blocked = dir.path().join("blocked");
    fs::create_dir(&blocked).unwrap();
    settings.store.device_file = blocked;
    settings.store.timestamp_file = dir.path().join("ts");
    settings.store.lock_timeout_ms = 200;
    let (session, mut queues) = Session::with_identity(TEST_UID, &settings);

    let payload = rec(json!({"color": "red", "task_id": "t-9"}));
    let outcome = manage(&session, Event::device("update", Some(payload))).unwrap();

    assert_eq!(outcome, Outcome::Nacked);
    let packets = published(&mut queues);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind, PacketKind::Nack);
    assert_eq!(packets[0].task_id, Some(TaskId::from("t-9")));
}

#[test]
fn test_negative_task_id_is_acked_as_received() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);

    let push = decode_inbound(
        "lock/CUP",
        br#"{"timestamp": 8, "task_id": -3, "datahold": {"color": "red"}}"#,
    )
    .unwrap();
    let outcome = manage(&session, push).unwrap();
    assert_eq!(outcome, Outcome::Forwarded(LocalCommand::Update));

    let update = queues.internal.try_recv().unwrap();
    assert!(matches!(
        manage(&session, update).unwrap(),
        Outcome::Applied(_)
    ));

    let packets = published(&mut queues);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind, PacketKind::Ack);
    assert_eq!(packets[0].task_id, Some(TaskId::Raw(json!(-3))));
    let (_, body) = packets[0].encode().unwrap();
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, json!({"timestamp": 8, "task_id": -3}));
}

#[test]
fn test_fractional_task_id_is_nacked_as_received() {
    let dir = tempdir().unwrap();
    let mut settings = Settings::default();
    let blocked = dir.path().join("blocked");
    fs::create_dir(&blocked).unwrap();
    settings.store.device_file = blocked;
    settings.store.timestamp_file = dir.path().join("ts");
    settings.store.lock_timeout_ms = 200;
    let (session, mut queues) = Session::with_identity(TEST_UID, &settings);

    let payload = rec(json!({"color": "red", "task_id": 1.5}));
    let outcome = manage(&session, Event::device("update", Some(payload))).unwrap();

    assert_eq!(outcome, Outcome::Nacked);
    let packets = published(&mut queues);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind, PacketKind::Nack);
    assert_eq!(packets[0].task_id, Some(TaskId::Raw(json!(1.5))));
}

#[test]
fn test_task_id_shapes() {
    assert_eq!(TaskId::from_value(&json!(7)), Some(TaskId::Number(7)));
    assert_eq!(TaskId::from_value(&json!("t")), Some(TaskId::from("t")));
    assert_eq!(TaskId::from_value(&json!(-1)), Some(TaskId::Raw(json!(-1))));
    assert_eq!(TaskId::from_value(&Value::Null), None);
    assert_eq!(TaskId::Raw(json!(-1)).to_value(), json!(-1));
    assert_eq!(TaskId::Raw(json!(2.5)).to_string(), "2.5");
}

#[test]
fn test_unknown_local_command_is_rejected() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);

    let outcome = manage(&session, Event::device("explode", None)).unwrap();

    assert!(matches!(outcome, Outcome::Rejected(_)));
    assert!(published(&mut queues).is_empty());
    assert!(!session.device_file.exists());
}

#[test]
fn test_sup_reports_selected_keys() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);
    seed(&session, json!({"id": 1, "uid": "x", "color": "red", "mode": "on"}));

    let request = rec(json!({"request": ["color", "id", "absent"]}));
    let outcome = manage(&session, Event::device("sup", Some(request))).unwrap();
    assert_eq!(outcome, Outcome::Published(PacketKind::Sup));

    let outcome = manage(&session, Event::device("sup", None)).unwrap();
    assert_eq!(outcome, Outcome::Published(PacketKind::Sup));

    let packets = published(&mut queues);
    assert_eq!(packets[0].datahold, Some(rec(json!({"color": "red"}))));
    assert!(packets[0].task_id.is_some());
    assert_eq!(
        packets[1].datahold,
        Some(rec(json!({"assets": {}, "color": "red", "mode": "on"})))
    );
}

#[test]
fn test_cup_requests_config() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);
    seed(&session, json!({"color": "red"}));

    manage(&session, Event::device("cup", None)).unwrap();
    let request = rec(json!({"request": ["color", "missing"]}));
    manage(&session, Event::device("cup", Some(request))).unwrap();

    let packets = published(&mut queues);
    assert_eq!(packets.len(), 2);
    assert!(packets.iter().all(|p| p.kind == PacketKind::Cup));
    assert_eq!(packets[0].datahold, Some(rec(json!({"request": "all"}))));
    assert_eq!(packets[1].datahold, Some(rec(json!({"request": ["color"]}))));
}

#[test]
fn test_input_persists_and_reports() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);

    let payload = rec(json!({"door": "open", "uid": "x", "FORCE": false}));
    let outcome = manage(&session, Event::device("input", Some(payload))).unwrap();

    assert_eq!(outcome, Outcome::Published(PacketKind::Sup));
    assert_eq!(
        session.device_config().load().unwrap(),
        rec(json!({"assets": {}, "door": "open", "uid": "x"}))
    );
    let packets = published(&mut queues);
    assert_eq!(packets[0].datahold, Some(rec(json!({"door": "open"}))));
}

#[test]
fn test_input_without_data_is_rejected() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);

    for payload in [None, Some(rec(json!({})))] {
        let outcome = manage(&session, Event::device("input", payload)).unwrap();
        assert!(matches!(outcome, Outcome::Rejected(_)));
    }
    assert!(published(&mut queues).is_empty());
}

#[test]
fn test_info_is_sent_verbatim() {
    let dir = tempdir().unwrap();
    let (session, mut queues) = test_session(&dir);

    let outcome = manage(&session, Event::device("info", None)).unwrap();
    assert!(matches!(outcome, Outcome::Rejected(_)));

    let data = rec(json!({"message": "battery low", "level": 12}));
    let outcome = manage(&session, Event::device("info", Some(data.clone()))).unwrap();
    assert_eq!(outcome, Outcome::Published(PacketKind::Info));

    let packets = published(&mut queues);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].datahold, Some(data));
    assert_eq!(packets[0].task_id, None);
}

#[test]
fn test_reload_and_reset_return_config() {
    let dir = tempdir().unwrap();
    let (session, _queues) = test_session(&dir);

    let outcome = manage(&session, Event::device("reload", None)).unwrap();
    assert_eq!(outcome, Outcome::Reloaded(rec(json!({"assets": {}}))));

    fs::write(&session.device_file, "garbage: [").unwrap();
    let outcome = manage(&session, Event::device("reset", None)).unwrap();
    assert_eq!(outcome, Outcome::Reloaded(rec(json!({"assets": {}}))));
}

#[test]
fn test_decode_inbound() {
    let event = decode_inbound("lock/all/PING", br#"{"timestamp": "12"}"#).unwrap();
    assert_eq!(event.origin, Origin::Mqtt);
    assert_eq!(event.command, Event::REMOTE_COMMAND);

    let message = InboundMessage::from_record(event.payload.unwrap()).unwrap();
    assert_eq!(message.command, "PING");
    assert_eq!(message.uid.as_deref(), Some("all"));
    assert_eq!(message.timestamp, 12);

    let event = decode_inbound(
        "lock/CUP",
        br#"{"timestamp": 5, "task_id": "t", "datahold": {"a": 1}}"#,
    )
    .unwrap();
    let message = InboundMessage::from_record(event.payload.unwrap()).unwrap();
    assert_eq!(message.uid, None);
    assert_eq!(message.task_id, Some(TaskId::from("t")));
    assert_eq!(message.datahold, Some(rec(json!({"a": 1}))));
}

#[test]
fn test_decode_inbound_rejects_bad_input() {
    assert!(matches!(
        decode_inbound("just-one", br#"{"timestamp": 1}"#),
        Err(WireError::Topic(_))
    ));
    assert!(matches!(
        decode_inbound("a/b/c/d", br#"{"timestamp": 1}"#),
        Err(WireError::Topic(_))
    ));
    assert!(matches!(
        decode_inbound("lock/PING", b"not json"),
        Err(WireError::Body(_))
    ));
}

#[test]
fn test_packet_encode() {
    let packet =
        Packet::new(PacketKind::Ack, "ask/lock", "abc", 3).with_task_id(Some(TaskId::from(4)));
    let (topic, body) = packet.encode().unwrap();
    assert_eq!(topic, "ask/lock/abc/ACK");
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, json!({"timestamp": 3, "task_id": 4}));
}
