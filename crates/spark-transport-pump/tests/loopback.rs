//! 回环集成测试：在同一进程内驱动服务端与客户端，验证端到端的分帧、广播、单播与故障隔离。

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use spark_transport_pump::{
    FrameTransport, InboundMessage, Origin, TransportConfig, TransportError, TransportMode,
};

const MAX_FRAMES: usize = 1000;

fn frame(transport: &mut FrameTransport) {
    transport.begin_frame_pump();
    transport.end_frame_pump();
}

fn pump_until(
    transports: &mut [&mut FrameTransport],
    mut done: impl FnMut(&mut [&mut FrameTransport]) -> bool,
) {
    for _ in 0..MAX_FRAMES {
        for transport in transports.iter_mut() {
            frame(transport);
        }
        if done(transports) {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("condition not reached within {MAX_FRAMES} frames");
}

fn server() -> (FrameTransport, u16) {
    server_with(TransportConfig::default())
}

fn server_with(config: TransportConfig) -> (FrameTransport, u16) {
    let mut transport = FrameTransport::new(config).expect("valid config");
    transport.startup();
    transport.start_server(0).expect("listen on ephemeral port");
    let port = transport.listen_addr().expect("bound address").port();
    (transport, port)
}

fn client(port: u16) -> FrameTransport {
    let mut transport = FrameTransport::default();
    transport.startup();
    transport.start_client("127.0.0.1", port).expect("connect started");
    transport
}

fn connect_clients(server: &mut FrameTransport, clients: &mut [FrameTransport]) {
    let expected = clients.len();
    for _ in 0..MAX_FRAMES {
        frame(server);
        for client in clients.iter_mut() {
            frame(client);
        }
        if server.connection_count() == expected
            && clients
                .iter()
                .all(|client| client.mode() == TransportMode::ClientConnected)
        {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("clients did not connect");
}

fn raw_stream(port: u16) -> TcpStream {
    TcpStream::connect(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).expect("raw connect")
}

#[test]
fn ping_round_trip() {
    let (mut server, port) = server();
    let mut clients = [client(port)];
    connect_clients(&mut server, &mut clients);
    let [mut client] = clients;

    client.queue_outgoing_string("PING").expect("queue");
    let mut received = Vec::new();
    pump_until(&mut [&mut client, &mut server], |t| {
        received.extend(t[1].retrieve_incoming_strings());
        !received.is_empty()
    });
    assert_eq!(received, ["PING"]);

    server.queue_outgoing_string("PONG").expect("queue");
    let mut replies = Vec::new();
    pump_until(&mut [&mut server, &mut client], |t| {
        replies.extend(t[1].retrieve_incoming_messages());
        !replies.is_empty()
    });
    assert_eq!(
        replies,
        [InboundMessage {
            origin: Origin::Server,
            text: "PONG".to_owned(),
        }]
    );
}

#[test]
fn broadcast_reaches_every_client_once() {
    let (mut server, port) = server();
    let mut clients = [client(port), client(port)];
    connect_clients(&mut server, &mut clients);
    let [mut first, mut second] = clients;

    server.queue_outgoing_string("HELLO").expect("queue");
    let mut got_first = Vec::new();
    let mut got_second = Vec::new();
    pump_until(&mut [&mut server, &mut first, &mut second], |t| {
        got_first.extend(t[1].retrieve_incoming_strings());
        got_second.extend(t[2].retrieve_incoming_strings());
        !got_first.is_empty() && !got_second.is_empty()
    });
    for _ in 0..10 {
        frame(&mut server);
        frame(&mut first);
        frame(&mut second);
    }
    got_first.extend(first.retrieve_incoming_strings());
    got_second.extend(second.retrieve_incoming_strings());
    assert_eq!(got_first, ["HELLO"]);
    assert_eq!(got_second, ["HELLO"]);
    assert_eq!(server.pending_outgoing(), 0);
}

#[test]
fn message_split_across_frames_is_reassembled() {
    let (mut server, port) = server();
    let mut peer = raw_stream(port);
    pump_until(&mut [&mut server], |t| t[0].connection_count() == 1);

    peer.write_all(b"AB").expect("write fragment");
    for _ in 0..20 {
        frame(&mut server);
        thread::sleep(Duration::from_millis(1));
    }
    assert!(server.retrieve_incoming_strings().is_empty());

    peer.write_all(b"CD\0").expect("write tail");
    let mut received = Vec::new();
    pump_until(&mut [&mut server], |t| {
        received.extend(t[0].retrieve_incoming_strings());
        !received.is_empty()
    });
    assert_eq!(received, ["ABCD"]);
}

#[test]
fn several_messages_in_one_segment_keep_their_order() {
    let (mut server, port) = server();
    let mut peer = raw_stream(port);
    pump_until(&mut [&mut server], |t| t[0].connection_count() == 1);

    peer.write_all(b"one\0\0three\0").expect("write");
    let mut received = Vec::new();
    pump_until(&mut [&mut server], |t| {
        received.extend(t[0].retrieve_incoming_strings());
        received.len() == 3
    });
    assert_eq!(received, ["one", "", "three"]);
}

#[test]
fn failed_peer_does_not_affect_others() {
    let (mut server, port) = server();
    let mut clients = [client(port), client(port)];
    connect_clients(&mut server, &mut clients);
    let [mut leaving, mut staying] = clients;

    leaving.shutdown();
    pump_until(&mut [&mut server], |t| t[0].connection_count() == 1);

    server.queue_outgoing_string("STILL-HERE").expect("queue");
    let mut received = Vec::new();
    pump_until(&mut [&mut server, &mut staying], |t| {
        received.extend(t[1].retrieve_incoming_strings());
        !received.is_empty()
    });
    assert_eq!(received, ["STILL-HERE"]);
    assert_eq!(staying.mode(), TransportMode::ClientConnected);
}

#[test]
fn disconnect_flushes_queued_messages_first() {
    let (mut server, port) = server();
    let mut clients = [client(port)];
    connect_clients(&mut server, &mut clients);
    let [mut client] = clients;

    client.queue_outgoing_string("BYE").expect("queue");
    client.request_disconnect();
    client.begin_frame_pump();
    client.end_frame_pump();
    assert_eq!(client.mode(), TransportMode::Idle);
    assert!(!client.is_disconnect_pending());

    let mut received = Vec::new();
    pump_until(&mut [&mut server], |t| {
        received.extend(t[0].retrieve_incoming_strings());
        !received.is_empty() && t[0].connection_count() == 0
    });
    assert_eq!(received, ["BYE"]);
}

#[test]
fn messages_queued_before_any_peer_are_delivered() {
    let (mut server, port) = server();
    server.queue_outgoing_string("WELCOME").expect("queue");
    for _ in 0..5 {
        frame(&mut server);
    }
    assert_eq!(server.pending_outgoing(), 1);

    let mut peer = raw_stream(port);
    pump_until(&mut [&mut server], |t| t[0].connection_count() == 1);
    let mut received = [0u8; 8];
    peer.read_exact(&mut received).expect("read welcome");
    assert_eq!(&received, b"WELCOME\0");
}

#[test]
fn unicast_goes_to_the_sender_only() {
    let (mut server, port) = server();
    let mut clients = [client(port), client(port)];
    connect_clients(&mut server, &mut clients);
    let [mut asking, mut bystander] = clients;

    asking.queue_outgoing_string("WHO").expect("queue");
    let mut questions: Vec<InboundMessage> = Vec::new();
    pump_until(&mut [&mut asking, &mut server], |t| {
        questions.extend(t[1].retrieve_incoming_messages());
        !questions.is_empty()
    });
    let Origin::Client(id) = questions[0].origin else {
        panic!("server messages come from clients");
    };
    assert!(server.peer_addr(id).is_some());

    server
        .queue_outgoing_string_to_client(id, "YOU")
        .expect("queue unicast");
    let mut answer = Vec::new();
    pump_until(&mut [&mut server, &mut asking, &mut bystander], |t| {
        answer.extend(t[1].retrieve_incoming_strings());
        !answer.is_empty()
    });
    for _ in 0..10 {
        frame(&mut server);
        frame(&mut bystander);
    }
    assert_eq!(answer, ["YOU"]);
    assert!(bystander.retrieve_incoming_strings().is_empty());
}

#[test]
fn start_server_is_rejected_while_connected() {
    let (mut server, port) = server();
    let mut clients = [client(port)];
    connect_clients(&mut server, &mut clients);
    let [mut client] = clients;

    assert!(client.start_server(0).is_err());
    assert_eq!(client.mode(), TransportMode::ClientConnected);
    assert!(client.remote_addr().is_some());
}

#[test]
fn refused_connection_returns_to_idle() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };

    let mut transport = FrameTransport::default();
    transport.startup();
    if transport.start_client("127.0.0.1", port).is_ok() {
        pump_until(&mut [&mut transport], |t| t[0].mode() == TransportMode::Idle);
    }
    assert_eq!(transport.mode(), TransportMode::Idle);
    assert!(transport.remote_addr().is_none());
}

#[test]
fn server_loss_returns_client_to_idle() {
    let (mut server, port) = server();
    let mut clients = [client(port)];
    connect_clients(&mut server, &mut clients);
    let [mut client] = clients;

    server.stop_server();
    pump_until(&mut [&mut client], |t| t[0].mode() == TransportMode::Idle);
}

#[test]
fn slow_reader_is_dropped_above_high_water_mark() {
    let config = TransportConfig::default()
        .with_max_outbound_buffer(Some(1024))
        .with_stall_warning_frames(3);
    let (mut server, port) = server_with(config);
    let _silent = raw_stream(port);
    pump_until(&mut [&mut server], |t| t[0].connection_count() == 1);

    server
        .queue_outgoing_string("x".repeat(32 * 1024 * 1024))
        .expect("queue");
    pump_until(&mut [&mut server], |t| t[0].connection_count() == 0);
    assert_eq!(server.mode(), TransportMode::ServerListening);
}

#[test]
fn reading_peer_survives_a_burst_above_high_water_mark() {
    const BURST: usize = 16 * 1024 * 1024;
    let config = TransportConfig::default().with_max_outbound_buffer(Some(64 * 1024));
    let (mut server, port) = server_with(config);
    let mut peer = raw_stream(port);
    pump_until(&mut [&mut server], |t| t[0].connection_count() == 1);

    let reader = thread::spawn(move || {
        let mut chunk = vec![0u8; 64 * 1024];
        let mut total = 0;
        while total < BURST + 1 {
            match peer.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(read) => total += read,
            }
        }
        total
    });

    server
        .queue_outgoing_string("y".repeat(BURST))
        .expect("queue");
    pump_until(&mut [&mut server], |t| {
        t[0].connection_count() == 0 || reader.is_finished()
    });
    assert_eq!(server.connection_count(), 1);
    assert_eq!(reader.join().expect("reader thread"), BURST + 1);
}

#[test]
fn start_server_is_rejected_while_listening() {
    let (mut server, port) = server();
    let mut clients = [client(port)];
    connect_clients(&mut server, &mut clients);
    let bound = server.listen_addr();

    let err = server.start_server(0).expect_err("already listening");
    assert!(matches!(
        err,
        TransportError::InvalidMode {
            operation: "start_server",
            mode: TransportMode::ServerListening,
        }
    ));
    assert_eq!(server.mode(), TransportMode::ServerListening);
    assert_eq!(server.listen_addr(), bound);
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn server_disconnect_flushes_queued_messages_first() {
    let (mut server, port) = server();
    let mut clients = [client(port)];
    connect_clients(&mut server, &mut clients);
    let [mut client] = clients;

    server.queue_outgoing_string("BYE").expect("queue");
    server.request_disconnect();
    frame(&mut server);
    assert_eq!(server.mode(), TransportMode::Idle);

    let mut received = Vec::new();
    pump_until(&mut [&mut client], |t| {
        received.extend(t[0].retrieve_incoming_strings());
        t[0].mode() == TransportMode::Idle
    });
    received.extend(client.retrieve_incoming_strings());
    assert_eq!(received, ["BYE"]);
}
