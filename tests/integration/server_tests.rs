//! End-to-end tests over loopback TCP: command acks, fail-closed parsing,
//! and telemetry fan-out through the same peer set the server fills.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use super::mock_plant::{EventLog, MockPlant};

use stillctl::app::control_loop::ControlLoop;
use stillctl::app::state::{Mode, SharedState};
use stillctl::config::SystemConfig;
use stillctl::control::IdleSafeHold;
use stillctl::rpc::codec::{AckStatus, parse_ack};
use stillctl::rpc::{IpcServer, PeerSet, ProtocolEngine, Publisher};
use stillctl::telemetry::{FRAME_LEN, FRAME_VERSION, SensorPresenceMask, TelemetryFrame};

struct Harness {
    server: IpcServer,
    state: SharedState,
    peers: PeerSet,
}

fn start() -> Harness {
    let state = SharedState::default();
    let peers = PeerSet::new();
    let server = IpcServer::start(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        ProtocolEngine::new(state.clone()),
        peers.clone(),
    )
    .expect("bind loopback");
    Harness {
        server,
        state,
        peers,
    }
}

fn connect(server: &IpcServer) -> (TcpStream, BufReader<TcpStream>) {
    let stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let reader = BufReader::new(stream.try_clone().unwrap());
    (stream, reader)
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        thread::sleep(Duration::from_millis(5));
    }
}

fn roundtrip(tx: &mut TcpStream, rx: &mut BufReader<TcpStream>, line: &str) -> String {
    tx.write_all(line.as_bytes()).unwrap();
    tx.write_all(b"\n").unwrap();
    let mut ack = String::new();
    rx.read_line(&mut ack).unwrap();
    ack
}

type PublishingLoop = ControlLoop<MockPlant, IdleSafeHold, Publisher, EventLog>;

fn publisher_loop(peers: PeerSet, state: SharedState) -> PublishingLoop {
    ControlLoop::new(
        &SystemConfig::default(),
        SensorPresenceMask::ALL,
        state,
        MockPlant::new(),
        IdleSafeHold::new(),
        Publisher::new(peers),
        EventLog::default(),
    )
}

// ── Commands ─────────────────────────────────────────────────

#[test]
fn commands_are_acked_in_order() {
    let h = start();
    let (mut tx, mut rx) = connect(&h.server);

    let ack = roundtrip(
        &mut tx,
        &mut rx,
        r#"{"version":"v0","type":"set_mode","payload":{"mode":"ACTIVE"}}"#,
    );
    let ack = parse_ack(&ack).unwrap();
    assert_eq!(ack.command, "set_mode");
    assert_eq!(ack.status, AckStatus::Ok);
    assert_eq!(ack.message.as_deref(), Some("Mode set to ACTIVE"));
    assert_eq!(h.state.snapshot().mode, Mode::Active);

    // Two commands in one write come back as two acks, in order.
    tx.write_all(
        concat!(
            r#"{"version":"v0","type":"set_targets","payload":{"target_abv":95,"target_flow":2.5}}"#,
            "\n",
            r#"{"version":"v0","type":"get_telemetry","payload":{}}"#,
            "\n"
        )
        .as_bytes(),
    )
    .unwrap();
    let mut first = String::new();
    let mut second = String::new();
    rx.read_line(&mut first).unwrap();
    rx.read_line(&mut second).unwrap();
    assert_eq!(parse_ack(&first).unwrap().command, "set_targets");
    assert_eq!(parse_ack(&second).unwrap().command, "get_telemetry");

    let snapshot = h.state.snapshot();
    assert_eq!(snapshot.target_abv, 95.0);
    assert_eq!(snapshot.target_flow, 2.5);
}

#[test]
fn validation_error_keeps_connection_open() {
    let h = start();
    let (mut tx, mut rx) = connect(&h.server);

    let ack = roundtrip(
        &mut tx,
        &mut rx,
        r#"{"version":"v0","type":"set_targets","payload":{"target_abv":101,"target_flow":1}}"#,
    );
    let ack = parse_ack(&ack).unwrap();
    assert_eq!(ack.status, AckStatus::Error);
    assert!(ack.message.unwrap().contains("target_abv out of range"));

    let ack = roundtrip(
        &mut tx,
        &mut rx,
        r#"{"version":"v1","type":"get_telemetry","payload":{}}"#,
    );
    assert!(parse_ack(&ack).unwrap().message.unwrap().contains("Unknown version"));

    let ack = roundtrip(
        &mut tx,
        &mut rx,
        r#"{"version":"v0","type":"get_telemetry","payload":{}}"#,
    );
    assert!(parse_ack(&ack).unwrap().is_ok());
}

#[test]
fn invalid_json_is_acked_then_closed() {
    let h = start();
    let (mut tx, mut rx) = connect(&h.server);
    wait_for(|| h.server.peer_count() == 1);

    let ack = roundtrip(&mut tx, &mut rx, "{not json");
    let ack = parse_ack(&ack).unwrap();
    assert_eq!(ack.command, "unknown");
    assert_eq!(ack.status, AckStatus::Error);
    assert!(ack.message.unwrap().starts_with("JSON parse error"));

    let mut rest = String::new();
    assert_eq!(rx.read_line(&mut rest).unwrap_or(0), 0, "expected EOF, got {rest:?}");
    wait_for(|| h.server.peer_count() == 0);
}

#[test]
fn clients_are_independent() {
    let h = start();
    let (mut bad_tx, mut bad_rx) = connect(&h.server);
    let (mut good_tx, mut good_rx) = connect(&h.server);
    wait_for(|| h.server.peer_count() == 2);

    roundtrip(&mut bad_tx, &mut bad_rx, "garbage");
    wait_for(|| h.server.peer_count() == 1);

    let ack = roundtrip(
        &mut good_tx,
        &mut good_rx,
        r#"{"version":"v0","type":"set_mode","payload":{"mode":"IDLE"}}"#,
    );
    assert!(parse_ack(&ack).unwrap().is_ok());
}

#[test]
fn concurrent_clients_never_half_apply_targets() {
    const ROUNDS: u32 = 200;

    let h = start();
    let clients: Vec<_> = (0..2).map(|_| connect(&h.server)).collect();
    wait_for(|| h.server.peer_count() == 2);

    // Client `c` always sends flow == abv + c, so a torn update would break
    // the pairing.
    let writers: Vec<_> = clients
        .into_iter()
        .enumerate()
        .map(|(c, (mut tx, mut rx))| {
            thread::spawn(move || {
                for i in 0..ROUNDS {
                    let mode = if (i + c as u32) % 2 == 0 { "ACTIVE" } else { "IDLE" };
                    let ack = roundtrip(
                        &mut tx,
                        &mut rx,
                        &format!(
                            r#"{{"version":"v0","type":"set_mode","payload":{{"mode":"{mode}"}}}}"#
                        ),
                    );
                    assert!(parse_ack(&ack).unwrap().is_ok());

                    let abv = f64::from(i % 100);
                    let flow = abv + c as f64;
                    let ack = roundtrip(
                        &mut tx,
                        &mut rx,
                        &format!(
                            r#"{{"version":"v0","type":"set_targets","payload":{{"target_abv":{abv},"target_flow":{flow}}}}}"#
                        ),
                    );
                    assert!(parse_ack(&ack).unwrap().is_ok());
                }
                (tx, rx)
            })
        })
        .collect();

    while writers.iter().any(|w| !w.is_finished()) {
        let s = h.state.snapshot();
        let offset = s.target_flow - s.target_abv;
        assert!(
            offset == 0.0 || offset == 1.0,
            "torn targets: abv={} flow={}",
            s.target_abv,
            s.target_flow
        );
        thread::yield_now();
    }
    let mut clients: Vec<_> = writers.into_iter().map(|w| w.join().unwrap()).collect();

    // Once both are quiet, whichever client writes last wins outright.
    let (tx, rx) = &mut clients[1];
    roundtrip(
        tx,
        rx,
        r#"{"version":"v0","type":"set_mode","payload":{"mode":"ACTIVE"}}"#,
    );
    roundtrip(
        tx,
        rx,
        r#"{"version":"v0","type":"set_targets","payload":{"target_abv":42.5,"target_flow":7}}"#,
    );
    let (tx, rx) = &mut clients[0];
    roundtrip(
        tx,
        rx,
        r#"{"version":"v0","type":"set_mode","payload":{"mode":"IDLE"}}"#,
    );

    let s = h.state.snapshot();
    assert_eq!(s.mode, Mode::Idle);
    assert_eq!(s.target_abv, 42.5);
    assert_eq!(s.target_flow, 7.0);
}

// ── Telemetry ────────────────────────────────────────────────

#[test]
fn connected_client_receives_binary_frames() {
    let h = start();
    let (mut tx, mut rx) = connect(&h.server);
    wait_for(|| h.server.peer_count() == 1);

    let ack = roundtrip(
        &mut tx,
        &mut rx,
        r#"{"version":"v0","type":"set_mode","payload":{"mode":"ACTIVE"}}"#,
    );
    assert!(parse_ack(&ack).unwrap().is_ok());

    let mut cl = publisher_loop(h.peers.clone(), h.state.clone());
    cl.tick(0, 1_234);

    let mut buf = [0u8; FRAME_LEN];
    rx.read_exact(&mut buf).unwrap();
    assert_eq!(buf[0], FRAME_VERSION);
    let frame = TelemetryFrame::decode(&buf).unwrap();
    assert_eq!(frame.timestamp_ms, 1_234);
    assert_eq!(frame.mode, Mode::Active.wire_code());
    assert_eq!(cl.telemetry().reaped(), 0);
}

#[test]
fn departed_client_is_dropped_from_fan_out() {
    let h = start();
    let (stay_tx, mut stay_rx) = connect(&h.server);
    let (gone_tx, gone_rx) = connect(&h.server);
    wait_for(|| h.server.peer_count() == 2);

    drop(gone_rx);
    drop(gone_tx);

    let mut cl = publisher_loop(h.peers.clone(), h.state.clone());
    // Either the connection thread sees EOF or the publisher hits a write
    // error; both end with the peer gone.
    let mut now = 0;
    wait_for(|| {
        cl.tick(now, now);
        now += 200;
        h.server.peer_count() == 1
    });

    let mut buf = [0u8; FRAME_LEN];
    stay_rx.read_exact(&mut buf).unwrap();
    assert!(TelemetryFrame::decode(&buf).is_ok());
    drop(stay_tx);
}

#[test]
fn publish_with_no_clients_succeeds() {
    let h = start();
    let mut publisher = Publisher::new(h.peers.clone());
    assert!(publisher.publish(&[0u8; FRAME_LEN]));
}

// ── Lifecycle ────────────────────────────────────────────────

#[test]
fn stop_closes_connected_clients() {
    let mut h = start();
    let (_tx, mut rx) = connect(&h.server);
    wait_for(|| h.server.peer_count() == 1);

    h.server.stop();
    assert!(!h.server.is_running());
    assert!(h.peers.is_empty());

    let mut line = String::new();
    assert_eq!(rx.read_line(&mut line).unwrap_or(0), 0);
}

#[test]
fn bind_conflict_is_reported() {
    let h = start();
    let err = IpcServer::start(
        h.server.local_addr(),
        ProtocolEngine::new(SharedState::default()),
        PeerSet::new(),
    )
    .err()
    .expect("second bind must fail");
    assert!(err.to_string().contains(&h.server.local_addr().to_string()));
}
