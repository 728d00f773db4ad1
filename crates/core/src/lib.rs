//! treffpunkt-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die Relay, Protokoll und
//! Aushandlung gemeinsam nutzen: Client-IDs, Paar-Schluessel und die
//! Regel fuer die hoefliche Rolle bei Glare.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Result, TreffpunktError};
pub use types::{ist_hoeflich, ClientId, PaarSchluessel};
