//! WebSocket-Listener – ein JSON-Objekt pro Nachricht
//!
//! Fuer Browser-Clients. Text- und Binaer-Nachrichten werden gleich
//! behandelt, Pings beantwortet tungstenite selbst. Ping und Pong zaehlen
//! als Lebenszeichen fuer den Timeout, ein Close-Frame beendet die Verbindung. Danach laeuft dieselbe `ClientConnection` wie bei TCP.

use bytes::Bytes;
use futures_util::{future, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use treffpunkt_protocol::Envelope;

use crate::connection::{ClientConnection, Eingehend, TrennGrund};
use crate::error::SignalingError;
use crate::server_state::SignalingState;

/// WebSocket-Signaling-Server
pub struct WebSocketServer {
    state: Arc<SignalingState>,
    listener: TcpListener,
}

impl WebSocketServer {
    pub async fn binden(state: Arc<SignalingState>, bind_addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self { state, listener })
    }

    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Akzeptiert Verbindungen bis `shutdown_rx` ein `true`-Signal empfaengt
    pub async fn starten(
        self,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let lokale_addr = self.listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "WebSocket Signaling-Server gestartet");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let state = Arc::clone(&self.state);
                            let shutdown_rx_clone = shutdown_rx.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    verbindung_bedienen(state, stream, peer_addr, shutdown_rx_clone).await
                                {
                                    tracing::debug!(peer = %peer_addr, fehler = %e, "WebSocket-Handshake fehlgeschlagen");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "WebSocket-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("WebSocket Signaling-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("WebSocket Signaling-Server gestoppt");
        Ok(())
    }
}

/// Rohdaten einer WebSocket-Nachricht, `None` fuer Close und rohe Frames
fn nutzdaten(nachricht: Message, max_groesse: usize) -> Option<Result<Eingehend, SignalingError>> {
    let daten = match nachricht {
        Message::Text(text) => Bytes::from(text),
        Message::Binary(binaer) => Bytes::from(binaer),
        Message::Ping(_) | Message::Pong(_) => return Some(Ok(Eingehend::Lebenszeichen)),
        Message::Frame(_) | Message::Close(_) => return None,
    };
    if daten.len() > max_groesse {
        return Some(Err(SignalingError::NachrichtZuGross(daten.len())));
    }
    Some(Ok(Eingehend::Nachricht(daten)))
}

async fn verbindung_bedienen(
    state: Arc<SignalingState>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<TrennGrund, SignalingError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    tracing::debug!(peer = %peer_addr, "WebSocket-Handshake abgeschlossen");

    let max_groesse = state.config.max_frame_groesse;
    let (sink, eingang) = ws.split();

    let eingang = eingang
        .take_while(|nachricht| future::ready(!matches!(nachricht, Ok(Message::Close(_)))))
        .filter_map(move |nachricht| {
            future::ready(match nachricht {
                Ok(n) => nutzdaten(n, max_groesse),
                Err(e) => Some(Err(SignalingError::from(e))),
            })
        });
    let ausgang = sink.with(|envelope: Envelope| {
        future::ready(
            serde_json::to_string(&envelope)
                .map(Message::Text)
                .map_err(SignalingError::from),
        )
    });

    let grund = ClientConnection::neu(state, peer_addr, "websocket")
        .verarbeiten(Box::pin(eingang), Box::pin(ausgang), shutdown_rx)
        .await;
    Ok(grund)
}
