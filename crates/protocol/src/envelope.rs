//! Envelope – Die Einheit des Signaling-Verkehrs
//!
//! Jeder Frame ist genau ein JSON-Objekt:
//!
//! ```text
//! { "type": "offer" | "answer" | "ice-candidate" | "bye"
//!         | "list-peers" | "peers-list" | "client-id" | "error",
//!   "from": "<client-id>",   // immer vom Relay gesetzt
//!   "to":   "<client-id>",   // optional
//!   "id":   "<client-id>",   // nur bei client-id
//!   "payload": { ... } }
//! ```
//!
//! ## Design
//! - Eingehende Frames werden zu einem typisierten Ergebnis dekodiert
//!   (`ClientNachricht` oder `DecodeFehler`), es gibt keinen Panik-Pfad.
//! - Ein vom Client mitgeschicktes `from` wird ignoriert. Der Relay setzt
//!   den Absender selbst, ein Client kann keinen anderen Absender vortaeuschen.
//! - `payload` von Offer, Answer und Kandidat ist fuer den Relay opak.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use treffpunkt_core::ClientId;

// ---------------------------------------------------------------------------
// Nachrichtentypen
// ---------------------------------------------------------------------------

/// Alle Werte des `type`-Felds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NachrichtenTyp {
    Offer,
    Answer,
    IceCandidate,
    Bye,
    ListPeers,
    PeersList,
    ClientId,
    Error,
}

impl NachrichtenTyp {
    /// Wire-Name des Typs
    pub fn als_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::Bye => "bye",
            Self::ListPeers => "list-peers",
            Self::PeersList => "peers-list",
            Self::ClientId => "client-id",
            Self::Error => "error",
        }
    }

    /// Parst einen Wire-Namen
    pub fn aus_str(s: &str) -> Option<Self> {
        Some(match s {
            "offer" => Self::Offer,
            "answer" => Self::Answer,
            "ice-candidate" => Self::IceCandidate,
            "bye" => Self::Bye,
            "list-peers" => Self::ListPeers,
            "peers-list" => Self::PeersList,
            "client-id" => Self::ClientId,
            "error" => Self::Error,
            _ => return None,
        })
    }
}

impl std::fmt::Display for NachrichtenTyp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

/// Nachrichten, die von der Aushandlungs-State-Machine verarbeitet werden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AushandlungsArt {
    Offer,
    Answer,
    IceCandidate,
}

impl AushandlungsArt {
    /// Zugehoeriger Wire-Typ
    pub fn typ(self) -> NachrichtenTyp {
        match self {
            Self::Offer => NachrichtenTyp::Offer,
            Self::Answer => NachrichtenTyp::Answer,
            Self::IceCandidate => NachrichtenTyp::IceCandidate,
        }
    }
}

// ---------------------------------------------------------------------------
// Fehler-Gruende
// ---------------------------------------------------------------------------

/// Maschinenlesbare Codes in `payload.reason` von `error`-Frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FehlerGrund {
    BadJson,
    UnknownType,
    UnknownTarget,
    SessionClosed,
    ProtocolViolation,
}

impl FehlerGrund {
    /// Alle Gruende, z.B. fuer Statistiken
    pub const ALLE: [FehlerGrund; 5] = [
        Self::BadJson,
        Self::UnknownType,
        Self::UnknownTarget,
        Self::SessionClosed,
        Self::ProtocolViolation,
    ];

    /// Wire-Name des Grundes
    pub fn als_str(self) -> &'static str {
        match self {
            Self::BadJson => "bad-json",
            Self::UnknownType => "unknown-type",
            Self::UnknownTarget => "unknown-target",
            Self::SessionClosed => "session-closed",
            Self::ProtocolViolation => "protocol-violation",
        }
    }

    /// Position in `ALLE`
    pub fn index(self) -> usize {
        match self {
            Self::BadJson => 0,
            Self::UnknownType => 1,
            Self::UnknownTarget => 2,
            Self::SessionClosed => 3,
            Self::ProtocolViolation => 4,
        }
    }
}

impl std::fmt::Display for FehlerGrund {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

// ---------------------------------------------------------------------------
// Envelope (ausgehend und weitergeleitet)
// ---------------------------------------------------------------------------

/// Ein Frame, wie er an Clients gesendet wird
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub typ: NachrichtenTyp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// `client-id` – teilt dem Client beim Verbindungsaufbau seine ID mit
    pub fn client_id(id: ClientId) -> Self {
        Self {
            typ: NachrichtenTyp::ClientId,
            from: Some(ClientId::server()),
            to: None,
            id: Some(id),
            payload: None,
        }
    }

    /// `peers-list` – Antwort auf `list-peers`
    pub fn peers_list(peers: Vec<ClientId>) -> Self {
        Self {
            typ: NachrichtenTyp::PeersList,
            from: Some(ClientId::server()),
            to: None,
            id: None,
            payload: Some(json!({ "peers": peers })),
        }
    }

    /// `error` mit maschinenlesbarem Grund
    pub fn fehler(grund: FehlerGrund) -> Self {
        Self {
            typ: NachrichtenTyp::Error,
            from: Some(ClientId::server()),
            to: None,
            id: None,
            payload: Some(json!({ "reason": grund.als_str() })),
        }
    }

    /// `bye` im Namen von `von` an `an`
    pub fn bye(von: ClientId, an: ClientId) -> Self {
        Self {
            typ: NachrichtenTyp::Bye,
            from: Some(von),
            to: Some(an),
            id: None,
            payload: None,
        }
    }

    /// Weitergeleitete Aushandlungs-Nachricht, `payload` unveraendert
    pub fn weitergeleitet(
        art: AushandlungsArt,
        von: ClientId,
        an: Option<ClientId>,
        payload: Value,
    ) -> Self {
        Self {
            typ: art.typ(),
            from: Some(von),
            to: an,
            id: None,
            payload: Some(payload),
        }
    }

    /// Ausgehende Nachricht eines Clients (ohne `from`, das setzt der Relay)
    pub fn an_peer(typ: NachrichtenTyp, an: ClientId, payload: Option<Value>) -> Self {
        Self {
            typ,
            from: None,
            to: Some(an),
            id: None,
            payload,
        }
    }

    /// Liest `payload.reason` eines `error`-Frames
    pub fn fehler_grund(&self) -> Option<FehlerGrund> {
        if self.typ != NachrichtenTyp::Error {
            return None;
        }
        let grund = self.payload.as_ref()?.get("reason")?.clone();
        serde_json::from_value(grund).ok()
    }

    /// Liest `payload.peers` eines `peers-list`-Frames
    pub fn peers(&self) -> Option<Vec<ClientId>> {
        if self.typ != NachrichtenTyp::PeersList {
            return None;
        }
        let peers = self.payload.as_ref()?.get("peers")?.clone();
        serde_json::from_value(peers).ok()
    }
}

// ---------------------------------------------------------------------------
// Eingehende Nachrichten
// ---------------------------------------------------------------------------

/// Typisierte Nachricht eines Clients an den Relay
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNachricht {
    /// Offer, Answer oder ICE-Kandidat, optional adressiert
    Aushandlung {
        art: AushandlungsArt,
        to: Option<ClientId>,
        payload: Value,
    },
    /// Verbindung zu einem Peer beenden
    Bye { to: Option<ClientId> },
    /// Liste der anderen verbundenen Clients anfordern
    ListPeers,
}

/// Fehler beim Dekodieren eines eingehenden Frames
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeFehler {
    #[error("Ungueltiges JSON: {0}")]
    UngueltigesJson(String),

    #[error("Frame ist kein JSON-Objekt")]
    KeinObjekt,

    #[error("Feld 'type' fehlt oder ist kein String")]
    TypFehlt,

    #[error("Feld 'to' ist kein String")]
    UngueltigesZiel,

    #[error("Unbekannter Nachrichtentyp: {0}")]
    UnbekannterTyp(String),

    #[error("Nachrichtentyp nur vom Server erlaubt: {0}")]
    NurServerTyp(NachrichtenTyp),
}

impl DecodeFehler {
    /// Wire-Grund fuer die `error`-Antwort an den Absender
    pub fn grund(&self) -> FehlerGrund {
        match self {
            Self::UngueltigesJson(_) | Self::KeinObjekt | Self::TypFehlt | Self::UngueltigesZiel => {
                FehlerGrund::BadJson
            }
            Self::UnbekannterTyp(_) | Self::NurServerTyp(_) => FehlerGrund::UnknownType,
        }
    }
}

/// Dekodiert einen rohen Frame eines Clients
pub fn dekodieren(rohdaten: &[u8]) -> Result<ClientNachricht, DecodeFehler> {
    let wert: Value = serde_json::from_slice(rohdaten)
        .map_err(|e| DecodeFehler::UngueltigesJson(e.to_string()))?;

    let mut objekt = match wert {
        Value::Object(objekt) => objekt,
        _ => return Err(DecodeFehler::KeinObjekt),
    };

    let typ = match objekt.get("type") {
        Some(Value::String(roh)) => {
            NachrichtenTyp::aus_str(roh).ok_or_else(|| DecodeFehler::UnbekannterTyp(roh.clone()))?
        }
        _ => return Err(DecodeFehler::TypFehlt),
    };

    let to = match objekt.remove("to") {
        None | Some(Value::Null) => None,
        Some(Value::String(ziel)) => Some(ClientId::from(ziel)),
        Some(_) => return Err(DecodeFehler::UngueltigesZiel),
    };

    let payload = objekt.remove("payload").unwrap_or(Value::Null);

    let art = match typ {
        NachrichtenTyp::Offer => AushandlungsArt::Offer,
        NachrichtenTyp::Answer => AushandlungsArt::Answer,
        NachrichtenTyp::IceCandidate => AushandlungsArt::IceCandidate,
        NachrichtenTyp::Bye => return Ok(ClientNachricht::Bye { to }),
        NachrichtenTyp::ListPeers => return Ok(ClientNachricht::ListPeers),
        NachrichtenTyp::PeersList | NachrichtenTyp::ClientId | NachrichtenTyp::Error => {
            return Err(DecodeFehler::NurServerTyp(typ));
        }
    };

    Ok(ClientNachricht::Aushandlung { art, to, payload })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
