//! # Connection Layer
//!
//! Reliable ordered byte-stream transport over TCP. Each connection gets one
//! reader task, which forwards received byte chunks to the orchestrator actor
//! as events, and one writer task draining an unbounded channel of outbound
//! frames. Close is reported at most once per peer; no data events follow it.
//!
//! The orchestrator listens for clients and dials each backend exactly once
//! at startup; lost connections are not re-established.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::Event;

const READ_CHUNK: usize = 8 * 1024;

/// Spawn the accept loop for client connections.
///
/// Each accepted connection is registered with the actor via
/// [`Event::ClientConnected`] before any of its data events, so ordering per
/// peer is preserved on the single event channel.
pub(crate) fn spawn_client_listener(
    listener: TcpListener,
    events_tx: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                },
            };
            debug!(%peer, "accepted client connection");
            let _ = stream.set_nodelay(true);
            let (read_half, write_half) = stream.into_split();
            let tx = spawn_writer(write_half);
            if events_tx.send(Event::ClientConnected { peer, tx }).is_err() {
                break;
            }
            spawn_client_reader(read_half, peer, events_tx.clone(), cancel.clone());
        }
    });
}

/// Dial one backend and wire its halves to the actor. Returns the outbound
/// frame channel.
pub(crate) async fn connect_backend(
    addr: SocketAddr,
    backend_idx: u32,
    events_tx: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) -> std::io::Result<mpsc::UnboundedSender<Bytes>> {
    let stream = TcpStream::connect(addr).await?;
    let _ = stream.set_nodelay(true);
    debug!(%addr, backend_idx, "connected to backend");
    let (read_half, write_half) = stream.into_split();
    let tx = spawn_writer(write_half);
    spawn_backend_reader(read_half, backend_idx, events_tx, cancel);
    Ok(tx)
}

/// Writer task: drains outbound frames into the socket. Exits when the
/// channel closes (connection state dropped by the core) or a write fails;
/// the paired reader notices the broken connection and reports the close.
fn spawn_writer(mut write_half: OwnedWriteHalf) -> mpsc::UnboundedSender<Bytes> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(err) = write_half.write_all(&frame).await {
                debug!(%err, "write failed, dropping connection writer");
                break;
            }
        }
    });
    tx
}

fn spawn_client_reader(
    read_half: OwnedReadHalf,
    peer: SocketAddr,
    events_tx: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        read_loop(read_half, cancel, |bytes| {
            events_tx
                .send(match bytes {
                    Some(bytes) => Event::ClientData { peer, bytes },
                    None => Event::ClientClosed { peer },
                })
                .is_ok()
        })
        .await;
    });
}

fn spawn_backend_reader(
    read_half: OwnedReadHalf,
    backend_idx: u32,
    events_tx: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        read_loop(read_half, cancel, |bytes| {
            events_tx
                .send(match bytes {
                    Some(bytes) => Event::BackendData { backend_idx, bytes },
                    None => Event::BackendClosed { backend_idx },
                })
                .is_ok()
        })
        .await;
    });
}

/// Shared read loop: forwards chunks via `deliver(Some(bytes))` and reports
/// close exactly once with `deliver(None)`. Cancellation skips the close
/// report; the actor is shutting down and has already dropped its state.
async fn read_loop(
    mut read_half: OwnedReadHalf,
    cancel: CancellationToken,
    deliver: impl Fn(Option<Bytes>) -> bool,
) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = read_half.read_buf(&mut buf) => read,
        };
        match read {
            Ok(0) | Err(_) => {
                deliver(None);
                return;
            }
            Ok(_) => {
                if !deliver(Some(buf.split().freeze())) {
                    return;
                }
            }
        }
    }
}
