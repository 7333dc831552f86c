//! Server Loop (spec §4.6): bind, accept, spawn a worker per connection, and
//! a per-connection read/dispatch/drain cycle with cooperative cancellation.

use crate::config::Config;
use crate::conn::ConnectionContext;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::protocol::{FramedReader, MsgHeader, HEADER_LEN};
use futures::FutureExt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Runs the accept loop until `shutdown` is cancelled. Accept errors are
/// logged and retried; the listener stays open (spec §7 `AcceptError`).
pub async fn run(cfg: Config, dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!(listen_addr = %cfg.listen_addr, "mongowire listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown signalled; closing listener");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        tracing::debug!(%addr, "accepted connection");
                        let dispatcher = dispatcher.clone();
                        let conn_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(socket, addr, dispatcher, conn_shutdown).await {
                                tracing::debug!(%addr, error = %e, "connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept() failed; continuing to listen");
                    }
                }
            }
        }
    }
}

/// Starts the server on a background task and returns once the listener is
/// bound, for use by both tests and embedders who want a handle to shut the
/// server down deliberately. Mirrors the teacher's own
/// `spawn_with_shutdown` test helper.
pub async fn spawn_with_shutdown(
    cfg: Config,
    dispatcher: Arc<Dispatcher>,
) -> Result<(SocketAddr, CancellationToken, tokio::task::JoinHandle<Result<()>>)> {
    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    let addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    let handle_shutdown = shutdown.clone();

    let handle = tokio::spawn(async move {
        tracing::info!(%addr, "mongowire listening");
        loop {
            tokio::select! {
                _ = handle_shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let dispatcher = dispatcher.clone();
                            let conn_shutdown = handle_shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, peer, dispatcher, conn_shutdown).await {
                                    tracing::debug!(%peer, error = %e, "connection closed with error");
                                }
                            });
                        }
                        Err(e) => tracing::warn!(error = %e, "accept() failed; continuing to listen"),
                    }
                }
            }
        }
    });

    Ok((addr, shutdown, handle))
}

async fn handle_connection(
    socket: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (mut read_half, write_half) = socket.into_split();
    let mut conn = ConnectionContext::new(write_half);

    // Outer fault barrier (spec §4.6 "A panic caught at the per-connection
    // boundary logs and closes the connection"). Per-message panics are
    // already absorbed by the dispatcher's own barrier; this one only fires
    // for something unwinding outside `process`, e.g. during residue drain.
    let outcome = AssertUnwindSafe(worker_loop(&mut read_half, &dispatcher, &mut conn, &shutdown))
        .catch_unwind()
        .await;
    tracing::debug!(%addr, "worker exiting");

    match outcome {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            tracing::error!(%addr, %message, "connection worker panicked; closing connection");
            Ok(())
        }
    }
}

async fn worker_loop(
    read_half: &mut OwnedReadHalf,
    dispatcher: &Dispatcher,
    conn: &mut ConnectionContext,
    shutdown: &CancellationToken,
) -> Result<()> {
    loop {
        let mut header_buf = [0u8; HEADER_LEN];
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = read_half.read_exact(&mut header_buf) => {
                match read {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let header = MsgHeader::parse(&header_buf);
        tracing::trace!(?header, "received header");

        let Some(body_len) = header.body_len() else {
            tracing::warn!(?header, "negative body length; closing connection");
            return Ok(());
        };

        let mut reader = FramedReader::new(read_half, body_len);
        let dispatch_result = dispatcher.dispatch(&header, &mut reader, conn).await;
        // Realign the stream regardless of dispatch outcome (spec §4.6 step 5).
        let drain_result = reader.drain().await;

        dispatch_result?;
        drain_result?;
    }
}
