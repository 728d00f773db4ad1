//! Aushandlungszustand aus Sicht einer Seite
//!
//! ```text
//! Idle -[Offer senden/empfangen]-> HaveLocalOffer | HaveRemoteOffer
//! HaveLocalOffer  -[Answer empfangen]-> Stable
//! HaveRemoteOffer -[Answer senden]----> Stable
//! Stable -[Offer senden/empfangen]----> HaveLocalOffer | HaveRemoteOffer
//! jeder  -[Bye | Trennung]------------> Closed
//! ```

use serde::{Deserialize, Serialize};

/// Zustand einer Seite des Paars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeitenZustand {
    Idle,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
}

impl SeitenZustand {
    /// Ein neues Offer darf in diesem Zustand beginnen
    pub fn darf_anbieten(self) -> bool {
        matches!(self, Self::Idle | Self::Stable)
    }
}

impl std::fmt::Display for SeitenZustand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::HaveLocalOffer => "have-local-offer",
            Self::HaveRemoteOffer => "have-remote-offer",
            Self::Stable => "stable",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
