//! Anwendungsseitige Aushandlung gegenueber einem Peer
//!
//! Der `SeitenAutomat` ist die reine Protokoll-Logik einer Seite: er nimmt
//! Ereignisse entgegen und liefert `Aktion`en, ohne selbst I/O zu machen.
//! Der `PeerNegotiator` fuehrt diese Aktionen gegen eine `PeerConnection`
//! aus und speist deren Ergebnisse als neue Ereignisse zurueck.
//!
//! Glare wird wie im Relay aufgeloest: die hoefliche Seite (groessere ID)
//! verwirft ihr eigenes Offer, die unhoefliche ignoriert das fremde.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};
use treffpunkt_core::{ist_hoeflich, ClientId};
use treffpunkt_protocol::{Envelope, NachrichtenTyp};

use crate::error::{NegotiationError, NegotiationResult, PeerFehler};
use crate::session::MAX_GEPUFFERTE_KANDIDATEN;
use crate::zustand::SeitenZustand;

// ---------------------------------------------------------------------------
// PeerConnection-Faehigkeit
// ---------------------------------------------------------------------------

/// Faehigkeit, Session-Beschreibungen zu erzeugen und anzuwenden
///
/// Beschreibungen und Kandidaten sind opake JSON-Werte.
#[async_trait]
pub trait PeerConnection: Send {
    async fn create_offer(&mut self) -> Result<Value, PeerFehler>;
    async fn create_answer(&mut self) -> Result<Value, PeerFehler>;
    async fn set_local_description(&mut self, beschreibung: Value) -> Result<(), PeerFehler>;
    async fn set_remote_description(&mut self, beschreibung: Value) -> Result<(), PeerFehler>;
    async fn add_ice_candidate(&mut self, kandidat: Value) -> Result<(), PeerFehler>;
}

/// Verbindungszustand, wie ihn die PeerConnection meldet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerbindungsZustand {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl VerbindungsZustand {
    /// Zustand beendet die Verbindung endgueltig
    pub fn ist_endgueltig(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

// ---------------------------------------------------------------------------
// Ereignisse und Aktionen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEreignis {
    /// Lokale Medien haben sich geaendert, ein Offer ist noetig
    AushandlungNoetig,
    /// Ergebnis von `create_offer`
    OfferErstellt(Value),
    /// Ergebnis von `create_answer`
    AnswerErstellt(Value),
    RemoteOffer(Value),
    RemoteAnswer(Value),
    RemoteKandidat(Value),
    RemoteBye,
    /// Lokal gesammelter ICE-Kandidat
    LokalerKandidat(Value),
    Verbindung(VerbindungsZustand),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aktion {
    OfferErstellen,
    AnswerErstellen,
    LokalSetzen(Value),
    RemoteSetzen(Value),
    KandidatHinzufuegen(Value),
    Senden(Envelope),
    Beendet,
}

// ---------------------------------------------------------------------------
// SeitenAutomat
// ---------------------------------------------------------------------------

/// Reine Uebergangsfunktion einer Seite
#[derive(Debug)]
pub struct SeitenAutomat {
    eigene: ClientId,
    peer: ClientId,
    hoeflich: bool,
    zustand: SeitenZustand,
    remote_gesetzt: bool,
    wartende_kandidaten: VecDeque<Value>,
}

impl SeitenAutomat {
    pub fn neu(eigene: ClientId, peer: ClientId) -> Self {
        let hoeflich = ist_hoeflich(&eigene, &peer);
        Self {
            eigene,
            peer,
            hoeflich,
            zustand: SeitenZustand::Idle,
            remote_gesetzt: false,
            wartende_kandidaten: VecDeque::new(),
        }
    }

    pub fn zustand(&self) -> SeitenZustand {
        self.zustand
    }

    pub fn ist_hoeflich(&self) -> bool {
        self.hoeflich
    }

    pub fn eigene(&self) -> &ClientId {
        &self.eigene
    }

    pub fn peer(&self) -> &ClientId {
        &self.peer
    }

    pub fn wartende_kandidaten(&self) -> usize {
        self.wartende_kandidaten.len()
    }

    pub fn verarbeiten(&mut self, ereignis: PeerEreignis) -> NegotiationResult<Vec<Aktion>> {
        if self.zustand == SeitenZustand::Closed {
            return match ereignis {
                PeerEreignis::RemoteBye | PeerEreignis::Verbindung(_) => Ok(Vec::new()),
                _ => Err(NegotiationError::SessionGeschlossen),
            };
        }

        let aktionen = match ereignis {
            PeerEreignis::AushandlungNoetig => {
                if !self.zustand.darf_anbieten() {
                    debug!(zustand = %self.zustand, "Aushandlung laeuft bereits");
                    return Ok(Vec::new());
                }
                self.zustand = SeitenZustand::HaveLocalOffer;
                vec![Aktion::OfferErstellen]
            }

            PeerEreignis::OfferErstellt(beschreibung) => {
                if self.zustand != SeitenZustand::HaveLocalOffer {
                    // Nach Glare-Rollback ueberholt
                    debug!(zustand = %self.zustand, "Veraltetes lokales Offer verworfen");
                    return Ok(Vec::new());
                }
                vec![
                    Aktion::LokalSetzen(beschreibung.clone()),
                    self.senden(NachrichtenTyp::Offer, beschreibung),
                ]
            }

            PeerEreignis::AnswerErstellt(beschreibung) => {
                if self.zustand != SeitenZustand::HaveRemoteOffer {
                    debug!(zustand = %self.zustand, "Veraltete lokale Answer verworfen");
                    return Ok(Vec::new());
                }
                self.zustand = SeitenZustand::Stable;
                vec![
                    Aktion::LokalSetzen(beschreibung.clone()),
                    self.senden(NachrichtenTyp::Answer, beschreibung),
                ]
            }

            PeerEreignis::RemoteOffer(beschreibung) => {
                if self.zustand == SeitenZustand::HaveLocalOffer {
                    if !self.hoeflich {
                        debug!(peer = %self.peer, "Glare: fremdes Offer ignoriert");
                        return Ok(Vec::new());
                    }
                    debug!(peer = %self.peer, "Glare: eigenes Offer zurueckgezogen");
                }
                self.zustand = SeitenZustand::HaveRemoteOffer;
                let mut aktionen = self.remote_setzen(beschreibung);
                aktionen.push(Aktion::AnswerErstellen);
                aktionen
            }

            PeerEreignis::RemoteAnswer(beschreibung) => {
                if self.zustand != SeitenZustand::HaveLocalOffer {
                    return Err(NegotiationError::ProtokollVerletzung(format!(
                        "Answer im Zustand {}",
                        self.zustand
                    )));
                }
                self.zustand = SeitenZustand::Stable;
                self.remote_setzen(beschreibung)
            }

            PeerEreignis::RemoteKandidat(kandidat) => {
                if self.remote_gesetzt {
                    vec![Aktion::KandidatHinzufuegen(kandidat)]
                } else {
                    if self.wartende_kandidaten.len() >= MAX_GEPUFFERTE_KANDIDATEN {
                        return Err(NegotiationError::KandidatenPufferVoll(
                            MAX_GEPUFFERTE_KANDIDATEN,
                        ));
                    }
                    trace!(peer = %self.peer, "Remote-Kandidat gepuffert");
                    self.wartende_kandidaten.push_back(kandidat);
                    Vec::new()
                }
            }

            PeerEreignis::LokalerKandidat(kandidat) => {
                vec![self.senden(NachrichtenTyp::IceCandidate, kandidat)]
            }

            PeerEreignis::RemoteBye => {
                self.beenden();
                vec![Aktion::Beendet]
            }

            PeerEreignis::Verbindung(zustand) => {
                if !zustand.ist_endgueltig() {
                    trace!(peer = %self.peer, ?zustand, "Verbindungszustand");
                    return Ok(Vec::new());
                }
                self.beenden();
                vec![
                    Aktion::Senden(Envelope::bye(self.eigene.clone(), self.peer.clone())),
                    Aktion::Beendet,
                ]
            }
        };

        Ok(aktionen)
    }

    fn remote_setzen(&mut self, beschreibung: Value) -> Vec<Aktion> {
        self.remote_gesetzt = true;
        let mut aktionen = Vec::with_capacity(1 + self.wartende_kandidaten.len());
        aktionen.push(Aktion::RemoteSetzen(beschreibung));
        aktionen.extend(
            self.wartende_kandidaten
                .drain(..)
                .map(Aktion::KandidatHinzufuegen),
        );
        aktionen
    }

    fn senden(&self, typ: NachrichtenTyp, payload: Value) -> Aktion {
        Aktion::Senden(Envelope::an_peer(typ, self.peer.clone(), Some(payload)))
    }

    fn beenden(&mut self) {
        self.zustand = SeitenZustand::Closed;
        self.wartende_kandidaten.clear();
    }
}

// ---------------------------------------------------------------------------
// PeerNegotiator
// ---------------------------------------------------------------------------

/// Treibt einen `SeitenAutomat` gegen eine `PeerConnection`
pub struct PeerNegotiator<P: PeerConnection> {
    automat: SeitenAutomat,
    verbindung: P,
}

impl<P: PeerConnection> PeerNegotiator<P> {
    pub fn neu(eigene: ClientId, peer: ClientId, verbindung: P) -> Self {
        Self {
            automat: SeitenAutomat::neu(eigene, peer),
            verbindung,
        }
    }

    pub fn zustand(&self) -> SeitenZustand {
        self.automat.zustand()
    }

    pub fn ist_hoeflich(&self) -> bool {
        self.automat.ist_hoeflich()
    }

    pub fn verbindung(&self) -> &P {
        &self.verbindung
    }

    /// Verarbeitet ein Ereignis vollstaendig und liefert die zu sendenden Envelopes
    pub async fn ereignis(&mut self, ereignis: PeerEreignis) -> NegotiationResult<Vec<Envelope>> {
        let mut warteschlange = VecDeque::from([ereignis]);
        let mut ausgehend = Vec::new();

        while let Some(ereignis) = warteschlange.pop_front() {
            for aktion in self.automat.verarbeiten(ereignis)? {
                match aktion {
                    Aktion::OfferErstellen => {
                        let offer = self.verbindung.create_offer().await?;
                        warteschlange.push_back(PeerEreignis::OfferErstellt(offer));
                    }
                    Aktion::AnswerErstellen => {
                        let answer = self.verbindung.create_answer().await?;
                        warteschlange.push_back(PeerEreignis::AnswerErstellt(answer));
                    }
                    Aktion::LokalSetzen(beschreibung) => {
                        self.verbindung.set_local_description(beschreibung).await?;
                    }
                    Aktion::RemoteSetzen(beschreibung) => {
                        self.verbindung.set_remote_description(beschreibung).await?;
                    }
                    Aktion::KandidatHinzufuegen(kandidat) => {
                        if let Err(e) = self.verbindung.add_ice_candidate(kandidat).await {
                            // Ein einzelner kaputter Kandidat bricht die Aushandlung nicht ab
                            warn!(peer = %self.automat.peer(), "Kandidat abgelehnt: {}", e);
                        }
                    }
                    Aktion::Senden(envelope) => ausgehend.push(envelope),
                    Aktion::Beendet => {
                        debug!(peer = %self.automat.peer(), "Aushandlung beendet");
                    }
                }
            }
        }

        Ok(ausgehend)
    }

    /// Verarbeitet ein vom Relay zugestelltes Envelope
    ///
    /// Envelopes anderer Absender und Nicht-Aushandlungs-Typen werden ignoriert.
    pub async fn envelope_verarbeiten(
        &mut self,
        envelope: &Envelope,
    ) -> NegotiationResult<Vec<Envelope>> {
        if envelope.from.as_ref() != Some(self.automat.peer()) {
            return Ok(Vec::new());
        }
        let payload = envelope.payload.clone().unwrap_or(Value::Null);
        let ereignis = match envelope.typ {
            NachrichtenTyp::Offer => PeerEreignis::RemoteOffer(payload),
            NachrichtenTyp::Answer => PeerEreignis::RemoteAnswer(payload),
            NachrichtenTyp::IceCandidate => PeerEreignis::RemoteKandidat(payload),
            NachrichtenTyp::Bye => PeerEreignis::RemoteBye,
            _ => return Ok(Vec::new()),
        };
        self.ereignis(ereignis).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
