//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "WebSocket transport adapter for the stream broker."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::StreamBroker;
use crate::error::QueryError;
use crate::session::{ClientHandle, Termination};

struct WebSocketState {
    broker: StreamBroker,
    subprotocol: String,
}

/// Builder for the WebSocket server that streams telemetry updates.
#[derive(Clone)]
pub struct WebSocketServerBuilder {
    listen: SocketAddr,
    broker: StreamBroker,
    subprotocol: String,
}

impl WebSocketServerBuilder {
    /// Create a builder bound to `listen` serving clients of `broker`.
    pub fn new(listen: SocketAddr, broker: StreamBroker) -> Self {
        Self {
            listen,
            broker,
            subprotocol: "echo-protocol".to_owned(),
        }
    }

    /// Sub-protocol selected when the client offers it.
    pub fn subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }

    /// Spawn the WebSocket server and return a shutdown handle.
    pub async fn spawn(self) -> anyhow::Result<WebSocketServerHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, subprotocol = %self.subprotocol, "websocket server listening");

        let state = Arc::new(WebSocketState {
            broker: self.broker,
            subprotocol: self.subprotocol,
        });

        // Every path accepts an upgrade; anything else is a 404.
        let app = Router::new().fallback(upgrade_handler).with_state(state);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                warn!(error = %err, "websocket server exited with error");
            }
        });

        Ok(WebSocketServerHandle {
            address: local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle for the running WebSocket server.
pub struct WebSocketServerHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WebSocketServerHandle {
    /// Return the bound listening address.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Trigger graceful shutdown and await completion.
    ///
    /// Open connections are not closed here; call
    /// [`StreamBroker::shutdown_clients`] first.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(err) => Err(anyhow::anyhow!(err)),
        }
    }
}

async fn upgrade_handler(
    State(state): State<Arc<WebSocketState>>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Some(ws) = ws else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let broker = state.broker.clone();
    ws.protocols([state.subprotocol.clone()])
        .on_upgrade(move |socket| client_loop(socket, broker))
}

async fn client_loop(mut socket: WebSocket, broker: StreamBroker) {
    let ClientHandle {
        id,
        mut outbound,
        mut termination,
    } = broker.connect();

    loop {
        tokio::select! {
            reason = &mut termination => {
                if let Ok(Termination::KeepAliveExpired { notice }) = reason {
                    let _ = socket.send(Message::Text(notice)).await;
                }
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            text = outbound.recv() => {
                let Some(text) = text else {
                    break;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    debug!(client_id = %id, "websocket send failed; dropping client");
                    break;
                }
            }
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };

                match message {
                    Message::Text(text) => broker.handle_message(id, &text),
                    Message::Binary(_) => {
                        warn!(client_id = %id, error = %QueryError::NonText, "malformed query treated as empty");
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    broker.disconnect(id);
}
