//! TCP ingestion server.
//!
//! Accepts one tracking client at a time, decodes its record stream and
//! publishes every well-formed pose to a [`PoseSink`]. Malformed records are
//! dropped without closing the connection; a closed connection sends the
//! server back to `accept`. Stopping is cooperative: every await point races
//! against a [`CancellationToken`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{AvatarError, AvatarResult};
use crate::protocol::{self, Framing};
use crate::registry::PoseSink;

/// Backoff after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Malformed records between two warnings on one connection.
const MALFORMED_WARN_EVERY: u64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub published: u64,
    pub dropped: u64,
}

pub struct IngestServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    framing: Framing,
    max_record_len: usize,
}

impl IngestServer {
    pub async fn bind(addr: SocketAddr, framing: Framing, max_record_len: usize) -> AvatarResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AvatarError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| AvatarError::Bind { addr, source })?;
        info!("Listening on {} ({:?} framing)", local_addr, framing);
        Ok(Self {
            listener,
            local_addr,
            framing,
            max_record_len,
        })
    }

    pub async fn from_config(config: &ServerConfig) -> AvatarResult<Self> {
        Self::bind(config.socket_addr()?, config.framing, config.max_record_len).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop. Returns once `cancel` fires.
    pub async fn run(self, sink: Arc<dyn PoseSink>, cancel: CancellationToken) -> AvatarResult<()> {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => continue,
                    }
                }
            };
            info!("Client connected: {}", peer);

            let mut stats = ConnectionStats::default();
            let result = ingest(
                stream,
                self.framing,
                self.max_record_len,
                sink.as_ref(),
                &cancel,
                &mut stats,
            )
            .await;

            match result {
                Ok(()) => {
                    info!("Closing connection to {} on shutdown", peer);
                    break;
                }
                Err(AvatarError::ConnectionClosed) => {
                    info!(
                        "Client {} disconnected ({} published, {} dropped), waiting for next connection...",
                        peer, stats.published, stats.dropped
                    );
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", peer, e);
                }
            }
            if stats.dropped > 0 {
                warn!("Dropped {} malformed records from {}", stats.dropped, peer);
            }
        }
        info!("Ingestion server stopped");
        Ok(())
    }

    /// Bind and run on the current tokio runtime.
    pub async fn start(config: &ServerConfig, sink: Arc<dyn PoseSink>) -> AvatarResult<ServerHandle> {
        let server = Self::from_config(config).await?;
        let local_addr = server.local_addr();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(server.run(sink, cancel.clone()));
        Ok(ServerHandle {
            cancel,
            local_addr,
            task,
        })
    }

    /// Bind and run on a dedicated OS thread with its own runtime, for hosts
    /// whose frame loop is not async. Bind errors are returned here.
    pub fn start_background(config: &ServerConfig, sink: Arc<dyn PoseSink>) -> AvatarResult<BackgroundServer> {
        let config = config.clone();
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<AvatarResult<SocketAddr>>(1);

        let thread_cancel = cancel.clone();
        let thread = std::thread::Builder::new()
            .name("pose-ingest".to_string())
            .spawn(move || -> AvatarResult<()> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(async move {
                    let server = match Self::from_config(&config).await {
                        Ok(server) => server,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return Ok(());
                        }
                    };
                    let _ = ready_tx.send(Ok(server.local_addr()));
                    server.run(sink, thread_cancel).await
                })
            })?;

        match ready_rx.recv() {
            Ok(Ok(local_addr)) => Ok(BackgroundServer {
                cancel,
                local_addr,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            // thread died before reporting, e.g. runtime construction failed
            Err(_) => match thread.join() {
                Ok(Err(e)) => Err(e),
                _ => Err(AvatarError::Io(std::io::Error::other("ingestion thread exited"))),
            },
        }
    }
}

/// Decode one client stream until it closes or `cancel` fires.
///
/// `Ok(())` means cancelled; `Err(ConnectionClosed)` is a normal disconnect.
pub async fn ingest<R>(
    reader: R,
    framing: Framing,
    max_record_len: usize,
    sink: &dyn PoseSink,
    cancel: &CancellationToken,
    stats: &mut ConnectionStats,
) -> AvatarResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut records = protocol::record_stream(reader, framing, max_record_len);
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = records.next() => next,
        };
        match next {
            Some(Ok(Ok(pose))) => {
                sink.publish(pose);
                stats.published += 1;
            }
            Some(Ok(Err(malformed))) => {
                stats.dropped += 1;
                if stats.dropped % MALFORMED_WARN_EVERY == 1 {
                    warn!("Dropping malformed record ({} so far): {}", stats.dropped, malformed);
                } else {
                    debug!("Dropping malformed record: {}", malformed);
                }
            }
            Some(Err(e)) => return Err(AvatarError::Io(e)),
            None => return Err(AvatarError::ConnectionClosed),
        }
    }
}

/// Server running as a tokio task.
pub struct ServerHandle {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    task: JoinHandle<AvatarResult<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancel and wait for the accept loop to exit.
    pub async fn stop(self) -> AvatarResult<()> {
        self.cancel.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(AvatarError::Io(std::io::Error::other(e))),
        }
    }
}

/// Server running on its own thread. Dropping it stops the server and waits
/// for the thread, so the listening port is released either way.
pub struct BackgroundServer {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    thread: Option<std::thread::JoinHandle<AvatarResult<()>>>,
}

impl BackgroundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(mut self) -> AvatarResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> AvatarResult<()> {
        self.cancel.cancel();
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        match thread.join() {
            Ok(result) => result,
            Err(_) => Err(AvatarError::Io(std::io::Error::other("ingestion thread panicked"))),
        }
    }
}

impl Drop for BackgroundServer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("ingestion thread ended with error: {}", e);
        }
    }
}
