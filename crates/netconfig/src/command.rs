//! The command channel: newline-delimited JSON messages over TCP. The
//! slave runs a `NetConfigServer` and reacts to events; the master opens
//! a `MasterLink` per slave and pushes settings and start/stop commands.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stream_types::{EventKind, NetConfigMessage};

use crate::ControlError;

type Handler = Box<dyn Fn(&NetConfigMessage) + Send + Sync>;
type HandlerMap = Arc<Mutex<HashMap<EventKind, Vec<Handler>>>>;

/// Slave-side command listener. Every decoded message is dispatched to
/// the handlers registered for its kind and then forwarded on the event
/// channel; malformed lines are logged and skipped so one bad client
/// cannot wedge the channel.
pub struct NetConfigServer {
    local_addr: SocketAddr,
    handlers: HandlerMap,
    accept_task: JoinHandle<()>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl NetConfigServer {
    pub async fn bind(
        addr: SocketAddr,
        events: flume::Sender<NetConfigMessage>,
    ) -> Result<Self, ControlError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let handlers: HandlerMap = Arc::new(Mutex::new(HashMap::new()));
        let connections: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_task = {
            let handlers = Arc::clone(&handlers);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, peer)) => {
                            debug!(%peer, "control connection accepted");
                            let handlers = Arc::clone(&handlers);
                            let events = events.clone();
                            let task =
                                tokio::spawn(serve_connection(stream, peer, handlers, events));
                            let mut connections =
                                connections.lock().unwrap_or_else(|e| e.into_inner());
                            connections.retain(|t| !t.is_finished());
                            connections.push(task);
                        }
                        Err(e) => {
                            warn!(error = %e, "control accept failed");
                        }
                    }
                }
            })
        };

        info!(%local_addr, "control server listening");
        Ok(Self {
            local_addr,
            handlers,
            accept_task,
            connections,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register a handler for one event kind. Handlers run on the
    /// connection task, before the event is forwarded.
    pub fn add_handler<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&NetConfigMessage) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
    }

    /// Stop accepting and drop every open connection. Commands already
    /// in flight on a dropped connection are never dispatched.
    pub fn stop(&self) {
        self.accept_task.abort();
        for task in self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }
    }
}

impl Drop for NetConfigServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handlers: HandlerMap,
    events: flume::Sender<NetConfigMessage>,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match NetConfigMessage::decode(&line) {
                    Ok(msg) => {
                        {
                            let handlers = handlers.lock().unwrap_or_else(|e| e.into_inner());
                            if let Some(for_kind) = handlers.get(&msg.kind()) {
                                for handler in for_kind {
                                    handler(&msg);
                                }
                            }
                        }
                        if events.send_async(msg).await.is_err() {
                            debug!(%peer, "event channel closed, dropping connection");
                            return;
                        }
                    }
                    Err(e) => warn!(%peer, error = %e, "ignoring malformed command"),
                }
            }
            Ok(None) => {
                debug!(%peer, "control connection closed");
                return;
            }
            Err(e) => {
                warn!(%peer, error = %e, "control connection failed");
                return;
            }
        }
    }
}

/// Master-side connection to one slave's command channel.
pub struct MasterLink {
    stream: TcpStream,
}

impl MasterLink {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ControlError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!(%addr, "control link established");
        Ok(Self { stream })
    }

    pub async fn send(&mut self, msg: &NetConfigMessage) -> Result<(), ControlError> {
        let mut line = msg.encode();
        line.push('\n');
        self.stream.write_all(line.as_bytes()).await?;
        Ok(())
    }
}
