//! Integration tests for the CommandQueue and ReaderLoop over real sockets.
//!
//! # Purpose
//!
//! These tests wire the two concurrency primitives together the way an
//! endpoint does:
//!
//! - the queue's session owns a socket writer, so every write runs on the
//!   worker thread;
//! - a ReaderLoop reads the other end and its finalizer posts a cleanup task
//!   back onto the queue.
//!
//! All sockets are loopback pairs on an OS-assigned port.

use std::io::Write;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use lanline_core::{encode_payload, CommandQueue, ConnectionId, LineReader, Payload, ReaderLoop};

/// Returns a connected (client, server) socket pair.
fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).expect("connect");
    let (server, _) = listener.accept().expect("accept");
    (client, server)
}

/// Two threads each submit 200 numbered lines.  The peer must see every line
/// intact, and each thread's lines in the order that thread submitted them.
#[test]
fn test_concurrent_submitters_never_interleave_partial_writes() {
    // Arrange
    let (writer, reader) = socket_pair();
    let queue = Arc::new(CommandQueue::spawn("it-fifo", writer).unwrap());
    let barrier = Arc::new(Barrier::new(2));

    // Act
    let submitters: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|tag| {
            let q = Arc::clone(&queue);
            let b = Arc::clone(&barrier);
            thread::spawn(move || {
                b.wait();
                for i in 0..200 {
                    let bytes = encode_payload(&Payload::from(format!("{tag}-{i}")), true).unwrap();
                    q.submit(move |w: &mut TcpStream| w.write_all(&bytes).unwrap())
                        .unwrap();
                }
            })
        })
        .collect();
    for s in submitters {
        s.join().unwrap();
    }
    queue
        .submit(|w: &mut TcpStream| w.shutdown(Shutdown::Write).unwrap())
        .unwrap();
    queue.flush().unwrap();

    // Assert
    let lines: Vec<String> = LineReader::new(reader).map(|l| l.unwrap()).collect();
    assert_eq!(lines.len(), 400);
    for tag in ["a", "b"] {
        let own: Vec<_> = lines.iter().filter(|l| l.starts_with(tag)).cloned().collect();
        let expected: Vec<_> = (0..200).map(|i| format!("{tag}-{i}")).collect();
        assert_eq!(own, expected, "lines from {tag} must stay in submission order");
    }
}

/// A reader whose peer hangs up posts its cleanup through the queue exactly once.
#[test]
fn test_reader_finalizer_posts_cleanup_through_queue() {
    // Arrange
    let (client, server) = socket_pair();
    let queue = Arc::new(CommandQueue::spawn("it-cleanup", Vec::<ConnectionId>::new()).unwrap());
    let (line_tx, line_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let id = ConnectionId::new();

    let q = Arc::clone(&queue);
    ReaderLoop::new(id)
        .spawn(
            server,
            move |_, line| line_tx.send(line).unwrap(),
            move |from, outcome| {
                assert!(outcome.is_clean());
                q.submit(move |removed: &mut Vec<ConnectionId>| {
                    removed.push(from);
                    done_tx.send(removed.clone()).unwrap();
                })
                .unwrap();
            },
        )
        .unwrap();

    // Act
    let mut c = client;
    c.write_all(b"hello\n").unwrap();
    c.shutdown(Shutdown::Both).unwrap();

    // Assert
    let line = line_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(line, "hello");
    let removed = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(removed, vec![id]);
}
