//! Client-Connection – Verwaltet eine einzelne Verbindung
//!
//! Jede Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task, unabhaengig vom Transport. TCP und WebSocket liefern nur
//! einen Stream roher Nachrichten und einen Sink fuer Envelopes.
//!
//! ## Ablauf
//! ```text
//! registrieren -> client-id senden
//!     |
//!     v
//! loop: eingehend -> Relay | Ausgangs-Queue -> Transport
//!     |  Ende bei: Client trennt, Timeout, Ueberlauf, Shutdown
//!     v
//! abmelden -> Lifecycle-Manager schliesst Sessions
//! ```
//!
//! ## Timeout
//! Nur wenn `verbindungs_timeout` gesetzt ist: sendet der Client so lange
//! weder Nachricht noch Lebenszeichen (WebSocket-Ping/Pong), wird getrennt.
//! Ohne Timeout trennt nur der Client selbst oder ein Ressourcenfehler.

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use treffpunkt_protocol::Envelope;

use crate::error::SignalingError;
use crate::server_state::SignalingState;

/// Grund fuer das Ende einer Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrennGrund {
    ClientGetrennt,
    Timeout,
    /// Ueberlauf der Ausgangs-Queue oder Abmeldung von aussen
    ServerGetrennt,
    Transportfehler,
    Shutdown,
    RegistryVoll,
}

/// Ein Element des eingehenden Transport-Streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eingehend {
    /// Roher Frame fuer den Relay
    Nachricht(Bytes),
    /// Transport-Keepalive ohne Inhalt, setzt nur den Timeout zurueck
    Lebenszeichen,
}

/// Verarbeitet eine einzelne Client-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
    transport: &'static str,
}

impl ClientConnection {
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr, transport: &'static str) -> Self {
        Self {
            state,
            peer_addr,
            transport,
        }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung endet oder ein Shutdown-Signal eingeht.
    pub async fn verarbeiten<E, A>(
        self,
        mut eingang: E,
        mut ausgang: A,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> TrennGrund
    where
        E: Stream<Item = Result<Eingehend, SignalingError>> + Unpin,
        A: Sink<Envelope, Error = SignalingError> + Unpin,
    {
        let peer_addr = self.peer_addr;
        let relay = &self.state.relay;
        let timeout_dauer = self.state.config.verbindungs_timeout;

        let verbindung = match relay.bei_verbindung(Some(peer_addr)) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(peer = %peer_addr, fehler = %e, "Verbindung abgelehnt");
                let _ = ausgang.close().await;
                return TrennGrund::RegistryVoll;
            }
        };
        let id = verbindung.id.clone();

        tracing::info!(
            client_id = %id,
            peer = %peer_addr,
            transport = self.transport,
            "Client verbunden"
        );

        // Zeitpunkt des letzten empfangenen Frames
        let mut letzter_empfang = Instant::now();

        let grund = loop {
            tokio::select! {
                biased;

                _ = verbindung.trennen.cancelled() => {
                    break TrennGrund::ServerGetrennt;
                }

                // Ausgehende Envelopes aus der Queue
                naechste = verbindung.ausgang.naechste() => {
                    let Some(envelope) = naechste else {
                        break TrennGrund::ServerGetrennt;
                    };
                    if let Err(e) = ausgang.send(envelope).await {
                        tracing::warn!(client_id = %id, fehler = %e, "Senden fehlgeschlagen");
                        break TrennGrund::Transportfehler;
                    }
                }

                // Eingehende Nachricht vom Client
                frame = eingang.next() => {
                    match frame {
                        Some(Ok(Eingehend::Lebenszeichen)) => {
                            letzter_empfang = Instant::now();
                            tracing::trace!(client_id = %id, "Lebenszeichen empfangen");
                        }
                        Some(Ok(Eingehend::Nachricht(rohdaten))) => {
                            letzter_empfang = Instant::now();
                            tracing::trace!(client_id = %id, bytes = rohdaten.len(), "Nachricht empfangen");
                            relay.bei_nachricht(&id, &rohdaten);
                        }
                        Some(Err(e)) => {
                            tracing::warn!(client_id = %id, fehler = %e, "Lesefehler");
                            break TrennGrund::Transportfehler;
                        }
                        None => break TrennGrund::ClientGetrennt,
                    }
                }

                _ = frist_abwarten(letzter_empfang, timeout_dauer) => {
                    tracing::warn!(client_id = %id, "Verbindungs-Timeout");
                    break TrennGrund::Timeout;
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(client_id = %id, "Shutdown-Signal – Verbindung wird getrennt");
                        break TrennGrund::Shutdown;
                    }
                }
            }
        };

        // Abmelden loest das Aufraeumen der Sessions aus
        relay.bei_trennung(&id);
        let _ = ausgang.close().await;

        tracing::info!(client_id = %id, grund = ?grund, "Verbindungs-Task beendet");
        grund
    }
}

/// Wartet bis `letzter_empfang + timeout`, ohne Timeout fuer immer
async fn frist_abwarten(letzter_empfang: Instant, timeout: Option<Duration>) {
    match timeout {
        Some(dauer) => tokio::time::sleep_until(letzter_empfang + dauer).await,
        None => std::future::pending::<()>().await,
    }
}
