//! treffpunkt-negotiation – Aushandlungs-State-Machine pro Client-Paar
//!
//! Zwei Haelften desselben Protokolls:
//!
//! ```text
//! session::NegotiationSession   (Relay-Seite, eine Instanz pro Paar {A, B})
//!     Offer/Answer/Kandidat/Bye -> Zustandswechsel + weiterzuleitende Envelopes
//!
//! peer::PeerNegotiator          (Anwendungs-Seite, eine Instanz pro Peer)
//!     Ereignisse -> SeitenAutomat -> Aktionen auf der PeerConnection-Faehigkeit
//! ```
//!
//! Beide Haelften sind reine Uebergangsfunktionen `(Zustand, Ereignis) ->
//! (Zustand, Ausgaben)`. Asynchrone Ergebnisse der PeerConnection kommen als
//! Ereignisse zurueck.

pub mod error;
pub mod peer;
pub mod session;
pub mod zustand;

pub use error::{NegotiationError, NegotiationResult, PeerFehler};
pub use peer::{PeerConnection, PeerEreignis, PeerNegotiator, SeitenAutomat, VerbindungsZustand};
pub use session::{NegotiationSession, SessionEreignis, SessionZustand, Weiterleitung};
pub use zustand::SeitenZustand;
