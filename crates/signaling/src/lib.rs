//! treffpunkt-signaling – Signaling-Relay ueber TCP und WebSocket
//!
//! Dieser Crate vermittelt Session-Aushandlungen zwischen Clients. Er
//! vergibt Client-IDs, leitet Offer/Answer/Kandidaten zwischen zwei Peers
//! weiter und haelt pro Client-Paar eine Aushandlungs-Session. Medien
//! fliessen nie durch den Server.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer) | WebSocket Listener (WebSocketServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |  Ausgangs-Queue <- Relay, Lifecycle
//!     v
//! SignalingRelay
//!     +-- ClientRegistry   (IDs, Handles, Entdeckung)
//!     +-- SessionTabelle   (eine NegotiationSession pro Paar)
//!
//! LifecycleManager – schliesst Sessions getrennter Clients
//! ```

pub mod ausgang;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod relay;
pub mod server_state;
pub mod sessions;
pub mod tcp;
pub mod ws;

// Bequeme Re-Exporte
pub use ausgang::{AusgangsQueue, EinreihenErgebnis, Prioritaet};
pub use connection::{ClientConnection, Eingehend, TrennGrund};
pub use error::{SignalingError, SignalingResult};
pub use lifecycle::LifecycleManager;
pub use registry::{ClientHandle, ClientRegistry, RegistryBeobachter, Verbindung};
pub use relay::{RelayStatistik, SignalingRelay, StatistikSchnappschuss};
pub use server_state::{SignalingConfig, SignalingState};
pub use sessions::{AufraeumErgebnis, SessionTabelle};
pub use tcp::SignalingServer;
pub use ws::WebSocketServer;
