//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `SignalingServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen tokio-Task mit einer
//! `ClientConnection`. Frames sind laengenpraefixiertes JSON (`FrameCodec`).

use futures_util::{SinkExt, StreamExt, TryStreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use treffpunkt_protocol::{Envelope, FrameCodec};

use crate::connection::{ClientConnection, Eingehend, TrennGrund};
use crate::error::SignalingError;
use crate::server_state::SignalingState;

/// TCP-Signaling-Server
pub struct SignalingServer {
    state: Arc<SignalingState>,
    listener: TcpListener,
}

impl SignalingServer {
    /// Bindet den TCP-Socket
    pub async fn binden(state: Arc<SignalingState>, bind_addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self { state, listener })
    }

    /// Tatsaechlich gebundene Adresse (bei Port 0 vom System vergeben)
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Akzeptiert Verbindungen bis `shutdown_rx` ein `true`-Signal empfaengt
    pub async fn starten(
        self,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let lokale_addr = self.listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "TCP Signaling-Server gestartet");

        loop {
            tokio::select! {
                // Neue eingehende Verbindung
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            tracing::debug!(peer = %peer_addr, "TCP-Verbindung akzeptiert");
                            let state = Arc::clone(&self.state);
                            let shutdown_rx_clone = shutdown_rx.clone();
                            tokio::spawn(async move {
                                verbindung_bedienen(state, stream, peer_addr, shutdown_rx_clone).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("TCP Signaling-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("TCP Signaling-Server gestoppt");
        Ok(())
    }
}

async fn verbindung_bedienen(
    state: Arc<SignalingState>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> TrennGrund {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer = %peer_addr, fehler = %e, "TCP_NODELAY nicht gesetzt");
    }
    let codec = FrameCodec::with_max_size(state.config.max_frame_groesse);
    let (sink, eingang) = Framed::new(stream, codec).split::<Envelope>();

    let eingang = eingang.map_ok(Eingehend::Nachricht).map_err(SignalingError::from);
    let ausgang = sink.sink_map_err(SignalingError::from);

    ClientConnection::neu(state, peer_addr, "tcp")
        .verarbeiten(eingang, ausgang, shutdown_rx)
        .await
}
