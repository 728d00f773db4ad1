//! Fehlertypen fuer Treffpunkt
//!
//! Gemeinsame Fehler, die schon beim Bau der Grundtypen auftreten koennen.
//! Die Crates darueber definieren eigene Fehler und konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Treffpunkt
pub type Result<T> = std::result::Result<T, TreffpunktError>;

/// Fehler der Grundtypen
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreffpunktError {
    #[error("Ungueltige Client-ID: {0}")]
    UngueltigeId(String),

    #[error("Client-ID ist reserviert: {0}")]
    ReservierteId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = TreffpunktError::UngueltigeId("leer".into());
        assert_eq!(e.to_string(), "Ungueltige Client-ID: leer");
    }
}
