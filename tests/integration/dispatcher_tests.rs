//! Dispatcher routing, control handling and connection lifecycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ispbridge::config::{PACKET_POOL_SIZE, ProgrammerConfig, QUEUE_DEPTH};
use ispbridge::net::{ConnState, RejectReason};
use ispbridge::programmer::EngineState;
use ispbridge::protocol::{PacketGroup, PacketType};

use crate::mocks::{Rig, fast_config, sim_mcu};

#[test]
fn reset_control_is_acknowledged() {
    let mut rig = Rig::new();
    let (id, peer) = rig.connect();
    id.unwrap();
    assert!(peer.is_nonblocking());

    peer.send(PacketType::Reset, &[1]);
    rig.dispatcher.poll_once();
    peer.send(PacketType::Reset, &[0]);
    rig.dispatcher.poll_once();
    peer.send(PacketType::Reset, &[7]);
    rig.dispatcher.poll_once();

    assert_eq!(
        peer.received(),
        vec![
            (PacketType::Ack, vec![1]),
            (PacketType::Ack, vec![1]),
            (PacketType::Ack, vec![0]),
        ]
    );
    assert_eq!(*rig.reset.levels.lock().unwrap(), vec![true, false]);
}

#[test]
fn second_control_connection_rejected() {
    let mut rig = Rig::new();
    let (first, _peer) = rig.connect();
    first.unwrap();

    let (second, peer2) = rig.connect();
    assert_eq!(second, Err(RejectReason::ControlTaken));
    assert!(peer2.is_shut());
    assert_eq!(rig.dispatcher.connection_count(), 1);
    assert_eq!(rig.dispatcher.stats().rejected, 1);
}

#[test]
fn programmer_init_claims_engine() {
    let mut rig = Rig::new();
    let handle = rig.engine.handle();
    let (id, _peer) = rig.programmer_session();

    let conn = rig.dispatcher.connection(id).unwrap();
    assert_eq!(conn.group(), PacketGroup::Programmer);
    assert!(handle.is_bound_to(&conn.binding()));
    assert_eq!(handle.state(), EngineState::Running);

    // The Control slot is free again; a second client cannot take the engine.
    let (other, peer2) = rig.connect();
    other.unwrap();
    peer2.send(PacketType::ProgrammerInit, &[]);
    rig.dispatcher.poll_once();
    assert_eq!(peer2.received(), vec![(PacketType::Ack, vec![0])]);
    assert!(handle.is_bound_to(&rig.dispatcher.connection(id).unwrap().binding()));
}

#[test]
fn first_programmer_request_attaches_engine() {
    let mut rig = Rig::new();
    let handle = rig.engine.handle();
    let (id, peer) = rig.connect();
    let id = id.unwrap();

    let replies = rig.request(&peer, PacketType::LoadMcuInfo, &sim_mcu().encode());
    assert_eq!(replies, vec![(PacketType::Ack, vec![1])]);

    let conn = rig.dispatcher.connection(id).unwrap();
    assert_eq!(conn.group(), PacketGroup::Programmer);
    assert!(handle.is_bound_to(&conn.binding()));
    assert_eq!(handle.state(), EngineState::Running);
}

#[test]
fn programmer_request_refused_while_engine_busy() {
    let mut rig = Rig::new();
    let handle = rig.engine.handle();
    let (owner, _peer) = rig.programmer_session();

    let (_other, peer2) = rig.connect();
    peer2.send(PacketType::LoadMcuInfo, &sim_mcu().encode());
    rig.dispatcher.poll_once();

    let replies = peer2.received();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].0, PacketType::Error);
    assert_eq!(replies[1], (PacketType::Ack, vec![0]));
    assert!(handle.is_bound_to(&rig.dispatcher.connection(owner).unwrap().binding()));
}

#[test]
fn uart_data_without_bridge_is_refused() {
    let mut rig = Rig::new();
    let (_id, peer) = rig.connect();

    peer.send(PacketType::UartData, b"hello");
    rig.dispatcher.poll_once();

    let replies = peer.received();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].0, PacketType::Error);
    assert_eq!(replies[1], (PacketType::Ack, vec![0]));
    assert_eq!(rig.uart.log.lock().unwrap().starts, 0);
}

#[test]
fn stale_engine_reply_never_reaches_next_client() {
    let mut rig = Rig::new();
    let (first, _peer) = rig.programmer_session();
    // The engine keeps its own copy of the binding while a request runs.
    let in_flight = rig.dispatcher.connection(first).unwrap().binding();

    rig.dispatcher.close(first);
    let (second, peer2) = rig.connect();
    let second = second.unwrap();
    assert!(!rig.dispatcher.connection(second).unwrap().binding().same_as(&in_flight));

    let mut ack = rig.packets.acquire().unwrap();
    ack.fill_ack(true);
    in_flight.outbound.try_push(ack).unwrap();
    rig.dispatcher.poll_once();

    assert!(peer2.received().is_empty());
    drop(in_flight);
    assert_eq!(rig.packets.in_use(), 0);
}

#[test]
fn programmer_stop_requires_owner() {
    let mut rig = Rig::new();
    let handle = rig.engine.handle();
    let (_id, peer) = rig.programmer_session();

    let (_other, peer2) = rig.connect();
    peer2.send(PacketType::ProgrammerStop, &[]);
    rig.dispatcher.poll_once();
    assert_eq!(peer2.received(), vec![(PacketType::Ack, vec![0])]);
    assert!(handle.is_bound());

    peer.send(PacketType::ProgrammerStop, &[]);
    rig.dispatcher.poll_once();
    assert_eq!(peer.received(), vec![(PacketType::Ack, vec![1])]);
    assert!(!handle.is_bound());
}

#[test]
fn full_inbound_queue_drops_without_blocking() {
    let mut rig = Rig::new();
    let (id, peer) = rig.programmer_session();

    for _ in 0..=QUEUE_DEPTH {
        peer.send(PacketType::Cmd, &[0x30, 0, 0, 0]);
    }
    for _ in 0..=QUEUE_DEPTH {
        rig.dispatcher.poll_once();
    }

    let conn = rig.dispatcher.connection(id).unwrap();
    assert_eq!(conn.inbound().len(), QUEUE_DEPTH);
    assert_eq!(rig.dispatcher.stats().dropped, 1);
    assert_eq!(conn.state(), ConnState::Active);
}

#[test]
fn malformed_header_is_not_fatal() {
    let mut rig = Rig::new();
    let (id, peer) = rig.connect();
    let id = id.unwrap();

    peer.send_raw(&[0x1B, 0, 0x99, 0, 0]);
    rig.dispatcher.poll_once();
    peer.send(PacketType::Reset, &[1]);
    rig.dispatcher.poll_once();

    assert_eq!(rig.dispatcher.stats().parse_errors, 1);
    assert!(rig.dispatcher.connection(id).is_some());
    assert_eq!(peer.received(), vec![(PacketType::Ack, vec![1])]);
}

#[test]
fn peer_close_releases_engine_and_record() {
    let mut rig = Rig::new();
    let handle = rig.engine.handle();
    let (_id, peer) = rig.programmer_session();

    peer.close();
    rig.dispatcher.poll_once();

    assert_eq!(rig.dispatcher.connection_count(), 0);
    assert_eq!(rig.dispatcher.stats().closed, 1);
    assert!(!handle.is_bound());
    assert!(peer.is_shut());
    assert_eq!(rig.records.in_use(), 0);

    rig.engine.step();
    assert_eq!(handle.state(), EngineState::Paused);
}

#[test]
fn close_connection_packet_gets_no_reply() {
    let mut rig = Rig::new();
    let (_id, peer) = rig.connect();

    peer.send(PacketType::CloseConnection, &[]);
    rig.dispatcher.poll_once();

    assert!(peer.received().is_empty());
    assert!(peer.is_shut());
    assert_eq!(rig.dispatcher.connection_count(), 0);
}

#[test]
fn closing_returns_queued_packets() {
    let mut rig = Rig::new();
    let (_id, peer) = rig.programmer_session();
    for _ in 0..3 {
        peer.send(PacketType::Cmd, &[0x30, 0, 0, 0]);
        rig.dispatcher.poll_once();
    }
    assert_eq!(rig.packets.in_use(), 3);

    peer.close();
    rig.dispatcher.poll_once();
    assert_eq!(rig.packets.in_use(), 0);
}

#[test]
fn unsupported_control_reports_error() {
    let mut rig = Rig::new();
    let (_id, peer) = rig.connect();

    peer.send(PacketType::NetworkConfiguration, b"ssid");
    rig.dispatcher.poll_once();

    let replies = peer.received();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].0, PacketType::Error);
    assert!(!replies[0].1.is_empty());
    assert_eq!(replies[1], (PacketType::Ack, vec![0]));
}

#[test]
fn security_modes_are_recorded() {
    let mut rig = Rig::new();
    let (id, peer) = rig.connect();
    let id = id.unwrap();

    peer.send(PacketType::EnableSign, &[]);
    rig.dispatcher.poll_once();
    peer.send(PacketType::EnableEncryption, &[0]);
    rig.dispatcher.poll_once();

    let conn = rig.dispatcher.connection(id).unwrap();
    assert!(conn.sign);
    assert!(!conn.encryption);
    assert_eq!(
        peer.received(),
        vec![(PacketType::Ack, vec![1]), (PacketType::Ack, vec![1])]
    );
}

#[test]
fn uart_session_routes_and_stops_on_close() {
    let mut rig = Rig::new();
    let (id, peer) = rig.connect();
    let id = id.unwrap();

    peer.send(PacketType::UartInit, &[]);
    rig.dispatcher.poll_once();
    assert_eq!(peer.received(), vec![(PacketType::Ack, vec![1])]);
    assert_eq!(rig.dispatcher.connection(id).unwrap().group(), PacketGroup::Uart);

    peer.send(PacketType::UartData, b"hello");
    rig.dispatcher.poll_once();
    {
        let log = rig.uart.log.lock().unwrap();
        assert_eq!(log.starts, 1);
        assert!(log.services > 0, "bridge serviced every iteration");
        let binding = log.binding.as_ref().unwrap();
        let packet = binding.inbound.try_pop().unwrap();
        assert_eq!(packet.data(), b"hello");
    }

    peer.close();
    rig.dispatcher.poll_once();
    assert_eq!(rig.uart.log.lock().unwrap().stops, 1);
}

#[test]
fn exhausted_packet_pool_keeps_stream_framed() {
    let mut rig = Rig::new();
    let (_id, peer) = rig.connect();

    let held: Vec<_> = (0..PACKET_POOL_SIZE)
        .map(|_| rig.packets.acquire().unwrap())
        .collect();
    peer.send(PacketType::Reset, &[1]);
    rig.dispatcher.poll_once();
    assert_eq!(rig.dispatcher.stats().dropped, 1);
    assert!(peer.received().is_empty());
    assert!(rig.reset.levels.lock().unwrap().is_empty());

    drop(held);
    peer.send(PacketType::Reset, &[0]);
    rig.dispatcher.poll_once();
    assert_eq!(peer.received(), vec![(PacketType::Ack, vec![1])]);
    assert_eq!(*rig.reset.levels.lock().unwrap(), vec![false]);
}

#[test]
fn arrivals_are_admitted_during_poll() {
    let mut rig = Rig::new();
    let (link, peer) = crate::mock_link::pair();
    let mut record = rig.records.acquire().unwrap();
    record.open(link);
    record.activate().unwrap();
    assert!(rig.arrivals.offer(record).is_ok());

    rig.dispatcher.poll_once();
    assert_eq!(rig.dispatcher.connection_count(), 1);

    peer.send(PacketType::Reset, &[1]);
    rig.dispatcher.poll_once();
    assert_eq!(peer.received(), vec![(PacketType::Ack, vec![1])]);
}

#[test]
fn acceptor_feeds_dispatcher() {
    use ispbridge::net::acceptor::{AcceptOutcome, Acceptor};

    let mut rig = Rig::new();
    let listener = crate::mock_link::MemListener::default();
    let peer = listener.connect();
    let mut acceptor = Acceptor::new(
        listener.clone(),
        std::sync::Arc::clone(&rig.records),
        std::sync::Arc::clone(&rig.arrivals),
        &crate::mocks::fast_config(),
    );

    assert_eq!(acceptor.poll_once(), AcceptOutcome::Accepted);
    assert_eq!(listener.backlog(), 0);
    assert!(peer.is_nonblocking());

    rig.dispatcher.poll_once();
    assert_eq!(rig.dispatcher.connection_count(), 1);
    peer.send(PacketType::Reset, &[0]);
    rig.dispatcher.poll_once();
    assert_eq!(peer.received(), vec![(PacketType::Ack, vec![1])]);
}

#[test]
fn queued_reply_wakes_idle_dispatcher() {
    let mut rig = Rig::with_config(&ProgrammerConfig {
        select_timeout_ms: 2_000,
        ..fast_config()
    });
    let (id, peer) = rig.connect();
    let outbound = Arc::clone(rig.dispatcher.connection(id.unwrap()).unwrap().outbound());
    let packets = Arc::clone(&rig.packets);
    let producer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        let mut ack = packets.acquire().unwrap();
        ack.fill_ack(true);
        outbound.try_push(ack).unwrap();
    });

    let start = Instant::now();
    rig.dispatcher.poll_once();
    assert!(start.elapsed() < Duration::from_secs(1), "woken before the select timeout");
    producer.join().unwrap();
    assert_eq!(peer.received(), vec![(PacketType::Ack, vec![1])]);
}
