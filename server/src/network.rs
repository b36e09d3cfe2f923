//! Server network layer: WebSocket connections and the session event loop

use crate::broadcast::EventBroadcaster;
use crate::client_manager::{ClientManager, ConnectionId};
use crate::config::ServerConfig;
use crate::reset::ResetTicket;
use crate::session::{MissionSession, Outcome};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientEvent, ServerEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// Messages sent from connection and timer tasks to the session loop
#[derive(Debug)]
pub enum ServerMessage {
    EventReceived {
        client_id: ConnectionId,
        event: ClientEvent,
    },
    ClientDisconnected {
        client_id: ConnectionId,
    },
    ResetSettled {
        ticket: ResetTicket,
    },
    Shutdown,
}

/// Mission server owning the session and coordinating connection tasks
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    clients: Arc<RwLock<ClientManager>>,
    session: MissionSession,
    broadcaster: EventBroadcaster,
    acceptor: Option<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_address()).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let clients = Arc::new(RwLock::new(ClientManager::new(config.max_clients)));
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            broadcaster: EventBroadcaster::new(Arc::clone(&clients)),
            clients,
            session: MissionSession::from_config(config),
            acceptor: None,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sender into the session loop; send [`ServerMessage::Shutdown`] to stop it
    pub fn message_sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that accepts connections and starts one task per client
    fn spawn_connection_acceptor(&mut self) -> Result<(), ServerError> {
        let listener = self.listener.take().ok_or("server is already running")?;
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        self.acceptor = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        tokio::spawn(serve_connection(
                            stream,
                            addr,
                            Arc::clone(&clients),
                            server_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
        Ok(())
    }

    async fn dispatch(&self, outcome: Outcome) {
        self.broadcaster.deliver(outcome.dispatches).await;
        if let Some(ticket) = outcome.reset {
            schedule_settle(self.session.settle_delay(), ticket, self.server_tx.clone());
        }
    }

    /// Main loop: every session mutation happens here, one message at a time
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.spawn_connection_acceptor()?;

        info!(
            "Server started with {} missions, {:?} exclusivity, {}ms settle delay",
            self.session.registry().len(),
            self.session.policy(),
            self.session.settle_delay().as_millis()
        );

        while let Some(message) = self.server_rx.recv().await {
            let outcome = match message {
                ServerMessage::EventReceived { client_id, event } => {
                    debug!("Client {} sent {:?}", client_id, event);
                    self.session.handle(client_id, event, Instant::now())
                }
                ServerMessage::ClientDisconnected { client_id } => {
                    self.session.disconnect(client_id, Instant::now())
                }
                ServerMessage::ResetSettled { ticket } => self.session.settle(ticket, Instant::now()),
                ServerMessage::Shutdown => {
                    info!("Server shutting down");
                    break;
                }
            };
            self.dispatch(outcome).await;
        }

        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        Ok(())
    }
}

/// Posts the ticket back to the session loop once the settle delay has passed
pub fn schedule_settle(
    delay: Duration,
    ticket: ResetTicket,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = server_tx.send(ServerMessage::ResetSettled { ticket }) {
            error!("Failed to deliver reset settle: {}", e);
        }
    })
}

/// Runs one WebSocket connection until either side closes it
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    clients: Arc<RwLock<ClientManager>>,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let websocket = match tokio_tungstenite::accept_async(stream).await {
        Ok(websocket) => websocket,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    let (mut sink, mut incoming) = websocket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let client_id = {
        let mut clients = clients.write().await;
        clients.add_client(addr, tx)
    };

    let client_id = match client_id {
        Some(client_id) => client_id,
        None => {
            warn!("Rejecting connection from {}: server full", addr);
            let frame = CloseFrame {
                code: CloseCode::Again,
                reason: "Server full".into(),
            };
            let _ = sink.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    // Writer: drains this connection's outbound queue
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {:?}: {}", event, e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!("Client {} write failed: {}", client_id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = incoming.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientEvent::from_json(&text) {
                Ok(event) => {
                    clients.write().await.touch(client_id);
                    if let Err(e) = server_tx.send(ServerMessage::EventReceived { client_id, event }) {
                        error!("Failed to send event to main loop: {}", e);
                        break;
                    }
                }
                Err(e) => warn!("Client {} sent malformed event: {}", client_id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Client {} read failed: {}", client_id, e);
                break;
            }
        }
    }

    clients.write().await.remove_client(&client_id);
    writer.abort();
    if let Err(e) = server_tx.send(ServerMessage::ClientDisconnected { client_id }) {
        error!("Failed to report disconnect of client {}: {}", client_id, e);
    }
}
