//! Socket-side half of the transport (§4.B, §6): the actual `TcpListener`/
//! `TcpStream` I/O and self-address resolution. `mesh-rt-core::transport`
//! owns the message shapes and framing; this module owns the bytes on the
//! wire, grounded on `original_source/libmv/mv_sendrecv_sock.c`'s
//! `_mq_input_thread`/`_mq_output_thread`/`_mq_selfaddr`.

use mesh_rt_core::error::TransportError;
use mesh_rt_core::transport::{self, OutboundMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Accept loop (§4.B "Listener"): bind, `listen` with a 128 backlog
/// (tokio's `TcpListener::bind` handles the `listen` call internally), then
/// forever accept a connection, read its body until EOF, and enqueue it.
/// One message per connection, matching `_mq_input_thread`'s accept/read/
/// enqueue/close loop — reimplemented as one spawned task per connection
/// instead of one thread serially doing all four steps, so a slow peer on
/// one connection cannot stall the accept loop.
pub async fn run_listener(port: u16, inbound_tx: mpsc::Sender<String>) -> Result<(), TransportError> {
    let listener = bind(port).await?;
    serve_listener(listener, inbound_tx).await
}

/// Bind the listening socket without entering the accept loop, so callers
/// that need the OS-assigned port (`port == 0`, used by tests) can read it
/// back via `TcpListener::local_addr` before serving.
pub async fn bind(port: u16) -> Result<TcpListener, TransportError> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(TransportError::Read)
}

/// Run the accept loop over an already-bound listener (§4.B "Listener").
pub async fn serve_listener(
    listener: TcpListener,
    inbound_tx: mpsc::Sender<String>,
) -> Result<(), TransportError> {
    tracing::info!(
        port = listener.local_addr().map(|a| a.port()).unwrap_or(0),
        "listening for inbound mesh connections"
    );

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                continue;
            }
        };
        let tx = inbound_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, &tx).await {
                tracing::warn!(error = %err, peer = %peer, "inbound connection failed");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    inbound_tx: &mpsc::Sender<String>,
) -> Result<(), TransportError> {
    let mut buf = Vec::new();
    stream
        .read_to_end(&mut buf)
        .await
        .map_err(TransportError::Read)?;
    let body = String::from_utf8(buf)
        .map_err(|_| TransportError::BadAddress("non-utf8 message body".to_string()))?;
    // A full channel applies natural async back-pressure here instead of
    // the original's 1 microsecond spin-retry (§9 design note).
    inbound_tx
        .send(body)
        .await
        .map_err(|_| TransportError::BadAddress("inbound channel closed".to_string()))
}

/// Sender loop (§4.B "Sender"): pull a rendered body off the output queue,
/// dial a fresh connection to its destination, write the body, close.
/// Connect/write failures are logged and the loop continues — one bad
/// destination must never wedge outbound traffic for every other message
/// (§7 transport errors).
pub async fn run_sender(mut outbound_rx: mpsc::Receiver<OutboundMessage>) {
    while let Some(msg) = outbound_rx.recv().await {
        if let Err(err) = send_one(&msg).await {
            tracing::warn!(error = %err, dest = %msg.dest_addr, "failed to deliver outbound message");
        }
    }
}

async fn send_one(msg: &OutboundMessage) -> Result<(), TransportError> {
    let (host, port) = transport::parse_tcp_addr(&msg.dest_addr)?;
    let mut stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|source| TransportError::Connect {
            addr: msg.dest_addr.clone(),
            source,
        })?;
    stream
        .write_all(msg.body.as_bytes())
        .await
        .map_err(TransportError::Write)
}

/// Resolve this device's own `tcp://<ip>:<port>` address (§6): prefer
/// `eth0`, fall back to `wlan0`, else fail startup. Grounded on
/// `_mq_selfaddr`'s `getifaddrs` scan, reimplemented with the `if-addrs`
/// crate instead of raw `getifaddrs`/`ifaddrs` FFI.
pub fn resolve_self_addr(port: u16) -> Result<String, TransportError> {
    let interfaces = if_addrs::get_if_addrs().map_err(TransportError::Read)?;
    let pick = |name: &str| {
        interfaces
            .iter()
            .find(|i| i.name == name && i.ip().is_ipv4())
            .map(|i| i.ip())
    };
    let ip = pick("eth0")
        .or_else(|| pick("wlan0"))
        .ok_or(TransportError::NoSelfAddress)?;
    Ok(format!("tcp://{ip}:{port}"))
}
