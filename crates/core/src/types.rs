//! Gemeinsame Identifikationstypen fuer Treffpunkt
//!
//! Client-IDs sind opake Strings: entweder beim Verbindungsaufbau als UUID
//! vergeben oder von einer vorgeschalteten Auth-Schicht geliefert.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TreffpunktError};

/// Maximale Laenge einer extern gelieferten Client-ID
pub const MAX_ID_LAENGE: usize = 128;

/// Absenderkennung fuer Frames, die der Server selbst erzeugt
pub const SERVER_ABSENDER: &str = "server";

/// Eindeutige Client-ID
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Erstellt eine neue zufaellige ClientId
    pub fn neu() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Uebernimmt eine extern vergebene ID nach Pruefung
    ///
    /// Leere IDs, Steuerzeichen, zu lange IDs und die Server-Kennung werden
    /// abgelehnt.
    pub fn pruefen(roh: impl Into<String>) -> Result<Self> {
        let roh = roh.into();
        if roh.is_empty() || roh.len() > MAX_ID_LAENGE {
            return Err(TreffpunktError::UngueltigeId(roh));
        }
        if roh.chars().any(char::is_control) {
            return Err(TreffpunktError::UngueltigeId(roh));
        }
        if roh == SERVER_ABSENDER {
            return Err(TreffpunktError::ReservierteId(roh));
        }
        Ok(Self(roh))
    }

    /// Absender-ID fuer serverseitig erzeugte Frames
    pub fn server() -> Self {
        Self(SERVER_ABSENDER.to_string())
    }

    /// Gibt die ID als String-Slice zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::neu()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Bestimmt ob `eigene` im Paar mit `peer` die hoefliche Seite ist
///
/// Die Seite mit der groesseren ID (String-Ordnung) ist hoeflich. Beide
/// Enden berechnen das unabhaengig und kommen zum gleichen Ergebnis.
pub fn ist_hoeflich(eigene: &ClientId, peer: &ClientId) -> bool {
    eigene > peer
}

/// Ungeordnetes Client-Paar `{a, b}`
///
/// Intern sortiert, damit `{a, b}` und `{b, a}` denselben Schluessel ergeben.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaarSchluessel {
    klein: ClientId,
    gross: ClientId,
}

impl PaarSchluessel {
    /// Erstellt den Schluessel fuer das Paar `{a, b}`
    pub fn neu(a: ClientId, b: ClientId) -> Self {
        if a <= b {
            Self { klein: a, gross: b }
        } else {
            Self { klein: b, gross: a }
        }
    }

    /// Prueft ob `id` zum Paar gehoert
    pub fn enthaelt(&self, id: &ClientId) -> bool {
        &self.klein == id || &self.gross == id
    }

    /// Gibt die jeweils andere Seite zurueck
    pub fn anderer(&self, id: &ClientId) -> Option<&ClientId> {
        if &self.klein == id {
            Some(&self.gross)
        } else if &self.gross == id {
            Some(&self.klein)
        } else {
            None
        }
    }

    /// Die hoefliche Seite des Paars
    pub fn hoeflich(&self) -> &ClientId {
        &self.gross
    }

    /// Beide Seiten, kleinere ID zuerst
    pub fn seiten(&self) -> (&ClientId, &ClientId) {
        (&self.klein, &self.gross)
    }
}

impl std::fmt::Display for PaarSchluessel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}, {}}}", self.klein, self.gross)
    }
}
