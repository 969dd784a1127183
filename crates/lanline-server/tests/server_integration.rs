//! Integration tests for the server endpoint over loopback TCP.
//!
//! Each test starts a [`Server`] on `127.0.0.1:0`, drives it with plain
//! `TcpStream` clients and observes its callbacks through the
//! [`ChannelServerHandler`] event stream.  Every wait is bounded.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lanline_core::{ConnectionId, ConnectionState, ErrorKind, MAX_LINE_LEN};
use lanline_server::{ChannelServerHandler, Server, ServerEvent, ServerOptions};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(5);

fn loopback_options() -> ServerOptions {
    ServerOptions {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        ..ServerOptions::default()
    }
}

/// Waits for the first event matching `pick`, skipping any others.
async fn wait_for<T>(
    rx: &mut UnboundedReceiver<ServerEvent>,
    mut pick: impl FnMut(ServerEvent) -> Option<T>,
) -> T {
    let found = timeout(WAIT, async {
        while let Some(event) = rx.recv().await {
            if let Some(found) = pick(event) {
                return Some(found);
            }
        }
        None
    })
    .await;
    match found {
        Ok(Some(found)) => found,
        Ok(None) => panic!("event channel closed"),
        Err(_) => panic!("timed out waiting for event"),
    }
}

async fn start(handler: ChannelServerHandler, rx: &mut UnboundedReceiver<ServerEvent>) -> (Server, u16) {
    start_with(handler, loopback_options(), rx).await
}

async fn start_with(
    handler: ChannelServerHandler,
    options: ServerOptions,
    rx: &mut UnboundedReceiver<ServerEvent>,
) -> (Server, u16) {
    let server = Server::with_options(handler, options).unwrap();
    assert_ok!(server.connect(0));
    let port = wait_for(rx, |e| match e {
        ServerEvent::Connected { port } => Some(port),
        _ => None,
    })
    .await;
    (server, port)
}

async fn join(port: u16, rx: &mut UnboundedReceiver<ServerEvent>) -> (TcpStream, ConnectionId) {
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(WAIT)).unwrap();
    let id = wait_for(rx, |e| match e {
        ServerEvent::NewClient { client, .. } => Some(client),
        _ => None,
    })
    .await;
    (stream, id)
}

async fn stop(server: &Server, rx: &mut UnboundedReceiver<ServerEvent>) {
    assert_ok!(server.disconnect());
    wait_for(rx, |e| matches!(e, ServerEvent::Disconnected).then_some(())).await;
}

fn read_line(stream: &TcpStream) -> String {
    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line).unwrap();
    line
}

/// Reads every line until the server closes the stream.
fn read_until_closed(stream: TcpStream) -> JoinHandle<Vec<String>> {
    thread::spawn(move || {
        BufReader::new(stream)
            .lines()
            .map_while(Result::ok)
            .collect()
    })
}

/// `true` if `lines` is `first, first + 1, ..` with nothing missing or repeated.
fn is_run_from(lines: &[String], first: usize) -> bool {
    lines
        .iter()
        .enumerate()
        .all(|(i, line)| *line == (first + i).to_string())
}

/// `true` once the peer has closed the connection.
fn is_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    matches!(stream.read(&mut buf), Ok(0) | Err(_))
}

#[tokio::test]
async fn test_connect_reports_bound_port_and_connected_state() {
    // Arrange
    let (handler, mut rx) = ChannelServerHandler::new();

    // Act
    let (server, port) = start(handler, &mut rx).await;

    // Assert
    assert_ne!(port, 0);
    assert_eq!(server.port(), port);
    assert!(server.is_connected());
    assert_eq!(server.state(), ConnectionState::Connected);

    stop(&server, &mut rx).await;
}

#[tokio::test]
async fn test_message_from_client_is_delivered_exactly() {
    // Arrange
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, port) = start(handler, &mut rx).await;
    let (mut stream, id) = join(port, &mut rx).await;

    // Act
    stream.write_all(b"hello\r\n").unwrap();

    // Assert
    let (from, line) = wait_for(&mut rx, |e| match e {
        ServerEvent::Message { from, line } => Some((from, line)),
        _ => None,
    })
    .await;
    assert_eq!(from, id);
    assert_eq!(line, "hello");

    stop(&server, &mut rx).await;
}

#[tokio::test]
async fn test_new_client_is_registered_with_its_address() {
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, port) = start(handler, &mut rx).await;
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();

    let (client, address) = wait_for(&mut rx, |e| match e {
        ServerEvent::NewClient { client, address } => Some((client, address)),
        _ => None,
    })
    .await;

    assert_eq!(server.client_count(), 1);
    assert!(server.is_client(client));
    assert_eq!(server.clients(), vec![client]);
    assert_eq!(address, Some(stream.local_addr().unwrap()));

    stop(&server, &mut rx).await;
}

#[tokio::test]
async fn test_rejected_client_is_closed_without_registration() {
    // Arrange
    let (handler, mut rx) = ChannelServerHandler::new();
    let handler = handler.with_filter(|_| false);
    let (server, port) = start(handler, &mut rx).await;

    // Act
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(WAIT)).unwrap();
    wait_for(&mut rx, |e| match e {
        ServerEvent::Rejected { .. } => Some(()),
        ServerEvent::NewClient { .. } => panic!("rejected client was registered"),
        _ => None,
    })
    .await;

    // Assert
    assert!(is_closed(&mut stream));
    assert_eq!(server.client_count(), 0);

    stop(&server, &mut rx).await;
}

#[tokio::test]
async fn test_client_hangup_removes_it_exactly_once() {
    // Arrange
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, port) = start(handler, &mut rx).await;
    let (stream, id) = join(port, &mut rx).await;
    let (_other, _) = join(port, &mut rx).await;
    assert_eq!(server.client_count(), 2);

    // Act
    drop(stream);

    // Assert
    let removed = wait_for(&mut rx, |e| match e {
        ServerEvent::ClientRemoved { client } => Some(client),
        _ => None,
    })
    .await;
    assert_eq!(removed, id);
    assert_eq!(server.client_count(), 1);
    assert!(!server.is_client(id));

    stop(&server, &mut rx).await;
    while let Ok(event) = rx.try_recv() {
        assert!(
            !matches!(event, ServerEvent::ClientRemoved { client } if client == id),
            "client removed twice"
        );
    }
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    // Arrange
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, port) = start(handler, &mut rx).await;
    let mut streams = Vec::new();
    for _ in 0..3 {
        streams.push(join(port, &mut rx).await.0);
    }

    // Act
    assert_ok!(server.println("tick"));
    assert_ok!(server.println(42));
    assert_ok!(server.println(true));

    // Assert
    for stream in &streams {
        let mut reader = BufReader::new(stream);
        let mut lines = Vec::new();
        for _ in 0..3 {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            lines.push(line);
        }
        assert_eq!(lines, vec!["tick\n", "42\n", "true\n"]);
    }

    stop(&server, &mut rx).await;
}

#[tokio::test]
async fn test_unicast_reaches_only_the_addressed_client() {
    // Arrange
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, port) = start(handler, &mut rx).await;
    let (a, a_id) = join(port, &mut rx).await;
    let (b, _) = join(port, &mut rx).await;

    // Act
    assert_ok!(server.println_to(a_id, "just you"));
    assert_ok!(server.println("everyone"));

    // Assert
    assert_eq!(read_line(&a), "just you\n");
    assert_eq!(read_line(&b), "everyone\n");

    stop(&server, &mut rx).await;
}

#[tokio::test]
async fn test_sends_fail_fast_while_disconnected() {
    let (handler, _rx) = ChannelServerHandler::new();
    let server = Server::with_options(handler, loopback_options()).unwrap();

    let err = assert_err!(server.println("nobody"));
    assert_eq!(err.kind(), ErrorKind::NotConnected);
    let err = assert_err!(server.print_to(ConnectionId::new(), "nobody"));
    assert_eq!(err.kind(), ErrorKind::NotConnected);
}

#[tokio::test]
async fn test_send_to_unknown_client_is_input_error() {
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, _) = start(handler, &mut rx).await;

    let err = assert_err!(server.println_to(ConnectionId::new(), "hello?"));

    assert_eq!(err.kind(), ErrorKind::Input);
    assert!(err.to_string().contains("not a client"));

    stop(&server, &mut rx).await;
}

#[tokio::test]
async fn test_println_with_line_break_is_protocol_error() {
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, _) = start(handler, &mut rx).await;

    let err = assert_err!(server.println("two\nlines"));

    assert_eq!(err.kind(), ErrorKind::Protocol);
    stop(&server, &mut rx).await;
}

#[tokio::test]
async fn test_second_connect_is_already_connected() {
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, _) = start(handler, &mut rx).await;

    let err = assert_err!(server.connect(0));

    assert_eq!(err.kind(), ErrorKind::AlreadyConnected);
    stop(&server, &mut rx).await;
}

#[tokio::test]
async fn test_disconnect_closes_clients_and_frees_the_port() {
    // Arrange
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, port) = start(handler, &mut rx).await;
    let (mut stream, _) = join(port, &mut rx).await;

    // Act
    stop(&server, &mut rx).await;

    // Assert
    assert!(!server.is_connected());
    assert_eq!(server.client_count(), 0);
    assert!(is_closed(&mut stream));
    assert_eq!(
        assert_err!(server.disconnect()).kind(),
        ErrorKind::NotConnected
    );

    // The same port can be bound again by the same endpoint.
    assert_ok!(server.connect(port));
    let again = wait_for(&mut rx, |e| match e {
        ServerEvent::Connected { port } => Some(port),
        ServerEvent::Error(e) => panic!("reconnect failed: {e}"),
        _ => None,
    })
    .await;
    assert_eq!(again, port);
    stop(&server, &mut rx).await;
}

#[tokio::test]
async fn test_bind_on_busy_port_reports_port_busy() {
    // Arrange
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let (handler, mut rx) = ChannelServerHandler::new();
    let server = Server::with_options(handler, loopback_options()).unwrap();

    // Act
    assert_ok!(server.connect(port));

    // Assert
    let kind = wait_for(&mut rx, |e| match e {
        ServerEvent::Error(e) => Some(e.kind()),
        ServerEvent::Connected { .. } => panic!("bound a busy port"),
        _ => None,
    })
    .await;
    assert_eq!(kind, ErrorKind::PortBusy);
    assert_eq!(server.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_client_limit_closes_extra_connections() {
    // Arrange
    let (handler, mut rx) = ChannelServerHandler::new();
    let options = ServerOptions {
        max_clients: 1,
        ..loopback_options()
    };
    let (server, port) = start_with(handler, options, &mut rx).await;
    let (_first, _) = join(port, &mut rx).await;

    // Act
    let mut second = TcpStream::connect(("127.0.0.1", port)).unwrap();
    second.set_read_timeout(Some(WAIT)).unwrap();

    // Assert
    assert!(is_closed(&mut second));
    assert_eq!(server.client_count(), 1);

    stop(&server, &mut rx).await;
}

#[tokio::test]
async fn test_terminate_requires_disconnect_first() {
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, _) = start(handler, &mut rx).await;

    assert_eq!(
        assert_err!(server.terminate()).kind(),
        ErrorKind::AlreadyStarted
    );

    stop(&server, &mut rx).await;
    assert_ok!(server.terminate());
    assert_eq!(assert_err!(server.flush()).kind(), ErrorKind::NotStarted);
    assert_eq!(assert_err!(server.terminate()).kind(), ErrorKind::NotStarted);
}

#[tokio::test]
async fn test_disconnect_during_broadcasts_never_writes_to_closed_sockets() {
    // Arrange
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, port) = start(handler, &mut rx).await;
    let mut readers = Vec::new();
    for _ in 0..2 {
        readers.push(read_until_closed(join(port, &mut rx).await.0));
    }
    let sender = server.clone();
    let sends = thread::spawn(move || {
        let mut accepted = 0usize;
        loop {
            match sender.println(accepted.to_string()) {
                Ok(()) => accepted += 1,
                Err(e) => return (accepted, e.kind()),
            }
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Act
    assert_ok!(server.disconnect());
    let mut errors = Vec::new();
    wait_for(&mut rx, |e| match e {
        ServerEvent::Disconnected => Some(()),
        ServerEvent::Error(e) => {
            errors.push(e.kind());
            None
        }
        _ => None,
    })
    .await;
    let (accepted, refused) = sends.join().unwrap();

    // Assert
    assert_eq!(refused, ErrorKind::NotConnected);
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    for reader in readers {
        let lines = reader.join().unwrap();
        assert!(is_run_from(&lines, 0));
        // The send accepted just as teardown was queued may be dropped.
        assert!(lines.len() <= accepted);
        assert!(accepted - lines.len() <= 1);
    }
}

#[tokio::test]
async fn test_client_joining_mid_broadcast_leaves_others_intact() {
    // Arrange
    const COUNT: usize = 20_000;
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, port) = start(handler, &mut rx).await;
    let mut readers = Vec::new();
    for _ in 0..3 {
        readers.push(read_until_closed(join(port, &mut rx).await.0));
    }
    let sender = server.clone();
    let sends = thread::spawn(move || {
        for i in 0..COUNT {
            sender.println(i.to_string()).unwrap();
        }
    });

    // Act
    let late = read_until_closed(join(port, &mut rx).await.0);
    sends.join().unwrap();
    stop(&server, &mut rx).await;

    // Assert
    for reader in readers {
        let lines = reader.join().unwrap();
        assert_eq!(lines.len(), COUNT);
        assert!(is_run_from(&lines, 0));
    }
    // The late client sees an unbroken tail of the sequence.
    let tail = late.join().unwrap();
    assert!(tail.len() <= COUNT);
    assert!(is_run_from(&tail, COUNT - tail.len()));
}

#[tokio::test]
async fn test_idle_accept_loop_admits_and_stops_promptly() {
    // Arrange: a long backoff only matters after a failed accept.
    let (handler, mut rx) = ChannelServerHandler::new();
    let options = ServerOptions {
        accept_backoff: Duration::from_secs(30),
        ..loopback_options()
    };
    let (server, port) = start_with(handler, options, &mut rx).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Act
    let started = Instant::now();
    let (_stream, _) = join(port, &mut rx).await;
    let admitted = started.elapsed();
    let started = Instant::now();
    stop(&server, &mut rx).await;
    let stopped = started.elapsed();

    // Assert
    assert!(admitted < Duration::from_secs(2), "admission took {admitted:?}");
    assert!(stopped < Duration::from_secs(2), "teardown took {stopped:?}");
    assert_eq!(server.client_count(), 0);
    assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
}

#[tokio::test]
async fn test_overlong_line_is_protocol_error_and_drops_client() {
    // Arrange
    let (handler, mut rx) = ChannelServerHandler::new();
    let (server, port) = start(handler, &mut rx).await;
    let (mut stream, id) = join(port, &mut rx).await;

    // Act: more than the limit with no line terminator.
    let _ = stream.write_all(&vec![b'x'; MAX_LINE_LEN + 16]);

    // Assert
    let kind = wait_for(&mut rx, |e| match e {
        ServerEvent::Error(e) => Some(e.kind()),
        ServerEvent::Message { .. } => panic!("overlong line was delivered"),
        _ => None,
    })
    .await;
    assert_eq!(kind, ErrorKind::Protocol);
    let removed = wait_for(&mut rx, |e| match e {
        ServerEvent::ClientRemoved { client } => Some(client),
        _ => None,
    })
    .await;
    assert_eq!(removed, id);
    assert_eq!(server.client_count(), 0);

    stop(&server, &mut rx).await;
}
