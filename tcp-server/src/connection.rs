//! Connection pump (C8): accept loop, per-connection frame extraction,
//! dispatch, and ordered response writes.
//!
//! Each accepted connection runs on its own tokio task, driving the
//! socket through a `Framed<TcpStream, FrameCodec>` (the same
//! `Decoder`/`Encoder` pattern the teacher's `TixCodec` uses). Frames on
//! a connection are processed strictly in receive order; there is no
//! ordering guarantee across connections. No background heartbeat is
//! spawned per connection — see SPEC_FULL §5.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use tcp_core::frame::{Frame, FrameCodec, FORMAT_BINARY_SCHEMA};
use tcp_core::request::Request;
use tcp_core::response::Response;
use tcp_core::{dispatch, ServerState};

/// Binds `addr` and accepts connections until the process is asked to
/// shut down (the caller races this future against a signal handler).
pub async fn accept_loop(addr: SocketAddr, state: Arc<ServerState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    serve(listener, state).await
}

/// Accepts connections on an already-bound listener. Split out from
/// [`accept_loop`] so tests can bind an ephemeral port and learn its
/// address before serving.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let client_id = peer.to_string();
            let span = tracing::info_span!("connection", client_id = %client_id);
            let _guard = span.enter();
            tracing::info!("client connected");

            if let Err(e) = handle_connection(stream, &client_id, &state).await {
                tracing::info!(error = %e, "connection closed");
            }

            state.upload_sessions.sweep_owner(&client_id).await;
            state.download_sessions.sweep_owner(&client_id).await;
            tracing::info!("client disconnected, sessions swept");
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    client_id: &str,
    state: &ServerState,
) -> std::io::Result<()> {
    let _ = stream.set_nodelay(true);
    let mut framed = Framed::new(stream, FrameCodec);

    while let Some(result) = framed.next().await {
        let decoded = match result {
            Ok(decoded) => decoded,
            Err(e) => {
                // `FrameCodec::decode` only returns `Err` for a genuine
                // socket I/O error (framing issues are resynced/logged
                // internally and surface as `Ok(None)`/`Ok(Some(..))`).
                // Close the connection so the caller's session sweep runs.
                tracing::warn!(error = %e, "socket error, closing connection");
                break;
            }
        };

        let response_frame = process_frame(state, client_id, decoded.frame).await;
        if let Err(e) = framed.send(response_frame).await {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e));
        }
    }

    Ok(())
}

async fn process_frame(state: &ServerState, client_id: &str, frame: Frame) -> Frame {
    tracing::debug!(
        op = tcp_core::op::name(frame.op),
        seq = frame.sequence,
        "dispatching frame"
    );

    let response: Response = if frame.format != FORMAT_BINARY_SCHEMA {
        let mut resp = Response::err(format!("unsupported format tag {:#x}", frame.format));
        resp.status = Some("unsupported-format".to_string());
        resp
    } else {
        let req = Request::decode(&frame.payload);
        dispatch(state, client_id, req).await
    };

    Frame::new(frame.sequence, frame.op, FORMAT_BINARY_SCHEMA, response.encode())
}
