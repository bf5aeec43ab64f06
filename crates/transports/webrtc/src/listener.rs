//! Listener adapter
//!
//! Wraps a [`SignalListener`]. Every inbound carrier gets its own handshake
//! task; negotiated connections wait in a bounded queue for `accept`.
//! A failed handshake only loses that connection, while an error from the
//! underlying listener closes the whole adapter. Closing returns only after
//! the underlying listener has been dropped.

use crate::carrier::SignalListener;
use crate::config::NetConfig;
use crate::conn::RtcConn;
use crate::engine::PeerEngine;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

struct Shared {
    id: String,
    lifecycle: Lifecycle,
    queue: Mutex<mpsc::Receiver<RtcConn>>,
    /// Resolves once the accept loop has dropped the underlying listener
    loop_done: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Shared {
    async fn close(&self) -> Result<()> {
        self.lifecycle
            .close_once(|| async {
                // The scope is already cancelled, so the loop is on its way out.
                let done = self.loop_done.lock().await.take();
                if let Some(done) = done {
                    let _ = done.await;
                }

                let mut queue = self.queue.lock().await;
                queue.close();

                let mut drained = 0usize;
                while let Ok(conn) = queue.try_recv() {
                    let _ = conn.close().await;
                    drained += 1;
                }
                debug!(listener = %self.id, drained, "accept queue drained");
                Ok(())
            })
            .await
    }
}

/// Accepts WebRTC stream connections negotiated over an ordinary listener
pub struct RtcListener {
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
}

impl RtcListener {
    pub(crate) fn listen<L>(engine: Arc<dyn PeerEngine>, config: NetConfig, listener: L) -> Self
    where
        L: SignalListener,
    {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(config.accept_queue_capacity);
        let (done_tx, done_rx) = oneshot::channel();
        let local_addr = listener.local_addr();

        let shared = Arc::new(Shared {
            id: id.clone(),
            lifecycle: Lifecycle::new(id),
            queue: Mutex::new(rx),
            loop_done: Mutex::new(Some(done_rx)),
        });

        tokio::spawn(accept_loop(
            listener,
            engine,
            Arc::new(config),
            Arc::clone(&shared),
            tx,
            done_tx,
        ));

        info!(listener = %shared.id, addr = ?local_addr, "listening");
        Self { shared, local_addr }
    }

    /// Wait for the next negotiated connection
    ///
    /// Concurrent callers each receive a different connection. Returns
    /// `ConnectionClosed` once the listener is closed.
    pub async fn accept(&self) -> Result<RtcConn> {
        self.shared.lifecycle.check_not_closed()?;

        tokio::select! {
            biased;
            _ = self.shared.lifecycle.cancelled() => Err(Error::ConnectionClosed),
            conn = async { self.shared.queue.lock().await.recv().await } => {
                conn.ok_or(Error::ConnectionClosed)
            }
        }
    }

    /// Stop accepting and release the underlying listener
    ///
    /// The underlying listener is dropped before this returns, so its address
    /// can be bound again. Connections still waiting in the queue are closed.
    /// Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.shared.close().await
    }

    /// Address of the underlying listener, captured at listen time
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.shared.lifecycle.state()
    }
}

impl Drop for RtcListener {
    fn drop(&mut self) {
        self.shared.lifecycle.cancel();
    }
}

impl std::fmt::Debug for RtcListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcListener")
            .field("id", &self.shared.id)
            .field("state", &self.shared.lifecycle.state())
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

async fn accept_loop<L>(
    mut listener: L,
    engine: Arc<dyn PeerEngine>,
    config: Arc<NetConfig>,
    shared: Arc<Shared>,
    queue: mpsc::Sender<RtcConn>,
    done: oneshot::Sender<()>,
) where
    L: SignalListener,
{
    let mut failed = false;
    loop {
        let carrier = tokio::select! {
            biased;
            _ = shared.lifecycle.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(carrier) => carrier,
                Err(e) => {
                    error!(listener = %shared.id, error = %e, "accept failed, closing listener");
                    failed = true;
                    break;
                }
            },
        };

        let engine = Arc::clone(&engine);
        let config = Arc::clone(&config);
        let shared = Arc::clone(&shared);
        let queue = queue.clone();
        tokio::spawn(async move {
            let accepted = tokio::select! {
                biased;
                _ = shared.lifecycle.cancelled() => return,
                result = RtcConn::accept(engine.as_ref(), &config, carrier) => result,
            };

            let conn = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(listener = %shared.id, error = %e, "inbound handshake failed");
                    return;
                }
            };

            tokio::select! {
                biased;
                _ = shared.lifecycle.cancelled() => {
                    let _ = conn.close().await;
                }
                permit = queue.reserve() => match permit {
                    Ok(permit) => permit.send(conn),
                    Err(_) => {
                        let _ = conn.close().await;
                    }
                },
            }
        });
    }

    drop(listener);
    drop(done);
    debug!(listener = %shared.id, "accept loop stopped");

    if failed {
        let _ = shared.close().await;
    }
}
