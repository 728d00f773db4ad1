//! Fehlertypen der Aushandlung

use thiserror::Error;
use treffpunkt_core::ClientId;
use treffpunkt_protocol::FehlerGrund;

/// Fehler, den eine PeerConnection-Implementierung meldet
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct PeerFehler(pub String);

impl PeerFehler {
    pub fn neu(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Fehler der Aushandlungs-State-Machine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// Nachricht fuer eine bereits geschlossene Session
    #[error("Session ist geschlossen")]
    SessionGeschlossen,

    /// Nachricht passt nicht zum aktuellen Zustand
    #[error("Protokollverletzung: {0}")]
    ProtokollVerletzung(String),

    /// Absender gehoert nicht zum Paar der Session
    #[error("Client {0} gehoert nicht zum Paar")]
    FremderClient(ClientId),

    /// Zu viele Kandidaten vor der Remote-Beschreibung
    #[error("Kandidaten-Puffer voll (maximal {0})")]
    KandidatenPufferVoll(usize),

    /// Fehler der darunterliegenden PeerConnection
    #[error("PeerConnection-Fehler: {0}")]
    PeerConnection(#[from] PeerFehler),
}

impl NegotiationError {
    /// Wire-Grund fuer die `error`-Antwort an den Absender
    pub fn grund(&self) -> FehlerGrund {
        match self {
            Self::SessionGeschlossen => FehlerGrund::SessionClosed,
            Self::ProtokollVerletzung(_)
            | Self::FremderClient(_)
            | Self::KandidatenPufferVoll(_)
            | Self::PeerConnection(_) => FehlerGrund::ProtocolViolation,
        }
    }
}

/// Result-Typ der Aushandlung
pub type NegotiationResult<T> = Result<T, NegotiationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_gruende() {
        assert_eq!(
            NegotiationError::SessionGeschlossen.grund(),
            FehlerGrund::SessionClosed
        );
        assert_eq!(
            NegotiationError::ProtokollVerletzung("x".into()).grund(),
            FehlerGrund::ProtocolViolation
        );
        assert_eq!(
            NegotiationError::KandidatenPufferVoll(3).grund(),
            FehlerGrund::ProtocolViolation
        );
    }
}
