//! Fehlertypen fuer den Signaling-Service

use thiserror::Error;
use treffpunkt_core::{ClientId, TreffpunktError};

/// Fehlertyp fuer den Signaling-Service
///
/// Fehler einzelner Nachrichten (kaputtes JSON, unbekanntes Ziel, falscher
/// Aushandlungszustand) tauchen hier nicht auf: die beantwortet der Relay
/// direkt mit einem `error`-Envelope. Dieser Typ deckt nur Transport und
/// Ressourcen ab.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket, Frame-Codec)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket-Protokollfehler
    #[error("WebSocket-Fehler: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Envelope liess sich nicht serialisieren
    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    /// Registry hat ihre Kapazitaet erreicht
    #[error("Registry voll (maximal {0} Clients)")]
    RegistryVoll(usize),

    /// Extern gelieferte ID ist bereits verbunden
    #[error("Client-ID bereits vergeben: {0}")]
    IdVergeben(ClientId),

    /// Extern gelieferte ID ist ungueltig
    #[error(transparent)]
    UngueltigeId(#[from] TreffpunktError),

    /// Ausgangs-Queue eines Clients ist mit kritischen Nachrichten voll
    #[error("Ausgangs-Queue von {0} uebergelaufen")]
    AusgangUeberlauf(ClientId),

    /// Verbindung wurde bereits getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Nachricht ueberschreitet die erlaubte Groesse
    #[error("Nachricht zu gross: {0} Bytes")]
    NachrichtZuGross(usize),
}

impl SignalingError {
    /// Fehler, bei dem der Server die Verbindung von sich aus beendet
    pub fn ist_ressourcenfehler(&self) -> bool {
        matches!(self, Self::RegistryVoll(_) | Self::AusgangUeberlauf(_))
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
