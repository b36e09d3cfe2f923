use crate::commands::{parse_command, Command, HELP};
use crate::display::describe;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientEvent, ServerEvent};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Interactive console connected to the mission server
pub struct Console {
    sink: SplitSink<Socket, Message>,
    incoming: SplitStream<Socket>,
    watch: Option<Duration>,
    events_sent: u64,
    events_received: u64,
}

impl Console {
    pub async fn new(
        server_url: &str,
        watch: Option<Duration>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Connecting to {}...", server_url);
        let (socket, _) = connect_async(server_url).await?;
        let (sink, incoming) = socket.split();
        info!("Connected");

        Ok(Console {
            sink,
            incoming,
            watch: watch.filter(|period| !period.is_zero()),
            events_sent: 0,
            events_received: 0,
        })
    }

    async fn send_event(&mut self, event: &ClientEvent) -> Result<(), Box<dyn std::error::Error>> {
        let text = event.to_json()?;
        self.sink.send(Message::Text(text)).await?;
        self.events_sent += 1;
        debug!("Sent {}", event.name());
        Ok(())
    }

    /// Returns false once the user asked to quit
    async fn handle_line(&mut self, line: &str) -> bool {
        match parse_command(line) {
            Ok(Some(Command::Send(event))) => {
                if let Err(e) = self.send_event(&event).await {
                    error!("Error sending {}: {}", event.name(), e);
                }
                true
            }
            Ok(Some(Command::Help)) => {
                println!("{}", HELP);
                true
            }
            Ok(Some(Command::Quit)) => false,
            Ok(None) => true,
            Err(e) => {
                println!("{}", e);
                true
            }
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.send_event(&ClientEvent::RequestGlobalStatus).await?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut watch_interval = interval(self.watch.unwrap_or(Duration::from_secs(1)));
        let watching = self.watch.is_some();

        loop {
            tokio::select! {
                frame = self.incoming.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.events_received += 1;
                            println!("{}", render_frame(&text));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            match frame {
                                Some(frame) => warn!("Server closed the connection: {}", frame.reason),
                                None => warn!("Server closed the connection"),
                            }
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("Error receiving event: {}", e);
                            break;
                        }
                        None => break,
                    }
                },

                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if !self.handle_line(&line).await {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            error!("Error reading input: {}", e);
                            break;
                        }
                    }
                },

                _ = watch_interval.tick(), if watching => {
                    if let Err(e) = self.send_event(&ClientEvent::RequestGlobalStatus).await {
                        error!("Error requesting status: {}", e);
                    }
                },
            }
        }

        info!(
            "Leaving after {} events sent and {} received",
            self.events_sent, self.events_received
        );
        let _ = self.sink.close().await;

        Ok(())
    }
}

/// Text shown for one incoming frame; undecodable frames are shown raw
pub fn render_frame(text: &str) -> String {
    match ServerEvent::from_json(text) {
        Ok(event) => describe(&event),
        Err(e) => {
            warn!("Undecodable event: {}", e);
            format!("? {}", text)
        }
    }
}
