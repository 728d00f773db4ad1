//! Relay-seitige Aushandlungs-Session fuer ein Client-Paar
//!
//! Eine `NegotiationSession` beobachtet den Offer/Answer-Austausch zwischen
//! zwei Clients und entscheidet pro Nachricht, was weitergeleitet, gepuffert
//! oder verworfen wird:
//!
//! - **Glare**: bieten beide Seiten gleichzeitig an, gewinnt das Offer der
//!   unhoeflichen Seite. Das Offer der hoeflichen Seite wird verworfen.
//! - **Kandidaten-Puffer**: ICE-Kandidaten einer Seite werden erst
//!   zugestellt, wenn der Empfaenger die Remote-Beschreibung dieser Seite
//!   hat. Reihenfolge bleibt erhalten.
//! - **Renegotiation**: aus `Stable` darf jede Seite ein neues Offer senden.
//!
//! Die Session selbst ist synchron und ohne I/O. Der Aufrufer haelt den
//! Paar-Lock waehrend `verarbeiten` und reiht die zurueckgegebenen
//! `Weiterleitung`en in derselben Reihenfolge ein.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, trace};
use treffpunkt_core::{ist_hoeflich, ClientId, PaarSchluessel};
use treffpunkt_protocol::{AushandlungsArt, Envelope};

use crate::error::{NegotiationError, NegotiationResult};
use crate::zustand::SeitenZustand;

/// Maximale Anzahl gepufferter Kandidaten pro Session
pub const MAX_GEPUFFERTE_KANDIDATEN: usize = 256;

// ---------------------------------------------------------------------------
// Zustand und Ereignisse
// ---------------------------------------------------------------------------

/// Zustand des Paars aus Sicht des Relays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionZustand {
    Idle,
    /// Ein Offer von `anbieter` wartet auf die Answer
    HaveOffer { anbieter: ClientId },
    Stable,
    Closed,
}

impl std::fmt::Display for SessionZustand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::HaveOffer { anbieter } => write!(f, "have-offer({anbieter})"),
            Self::Stable => f.write_str("stable"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Eingabe fuer die Session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEreignis {
    Offer { von: ClientId, payload: Value },
    Answer { von: ClientId, payload: Value },
    Kandidat { von: ClientId, payload: Value },
    Bye { von: ClientId },
    /// Transport von `getrennt` ist weg, kein explizites Bye
    PeerGetrennt { getrennt: ClientId },
}

impl SessionEreignis {
    /// Ereignis aus einer eingehenden Aushandlungs-Nachricht
    pub fn aus_aushandlung(art: AushandlungsArt, von: ClientId, payload: Value) -> Self {
        match art {
            AushandlungsArt::Offer => Self::Offer { von, payload },
            AushandlungsArt::Answer => Self::Answer { von, payload },
            AushandlungsArt::IceCandidate => Self::Kandidat { von, payload },
        }
    }

    fn ausloeser(&self) -> &ClientId {
        match self {
            Self::Offer { von, .. }
            | Self::Answer { von, .. }
            | Self::Kandidat { von, .. }
            | Self::Bye { von } => von,
            Self::PeerGetrennt { getrennt } => getrennt,
        }
    }
}

/// Ein Envelope, das an `an` zugestellt werden soll
#[derive(Debug, Clone, PartialEq)]
pub struct Weiterleitung {
    pub an: ClientId,
    pub envelope: Envelope,
}

#[derive(Debug, Clone)]
struct GepufferterKandidat {
    von: ClientId,
    payload: Value,
}

// ---------------------------------------------------------------------------
// NegotiationSession
// ---------------------------------------------------------------------------

/// Aushandlungs-Zustand eines Paars `{A, B}`
#[derive(Debug)]
pub struct NegotiationSession {
    paar: PaarSchluessel,
    zustand: SessionZustand,
    wartende_kandidaten: VecDeque<GepufferterKandidat>,
    /// Seiten, deren Gegenueber bereits eine Remote-Beschreibung von ihnen hat
    beschrieben: HashSet<ClientId>,
    letzte_aktivitaet: Instant,
}

impl NegotiationSession {
    pub fn neu(paar: PaarSchluessel, jetzt: Instant) -> Self {
        Self {
            paar,
            zustand: SessionZustand::Idle,
            wartende_kandidaten: VecDeque::new(),
            beschrieben: HashSet::new(),
            letzte_aktivitaet: jetzt,
        }
    }

    pub fn paar(&self) -> &PaarSchluessel {
        &self.paar
    }

    pub fn zustand(&self) -> &SessionZustand {
        &self.zustand
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.zustand == SessionZustand::Closed
    }

    /// Die hoefliche Seite des Paars
    pub fn hoeflich(&self) -> &ClientId {
        self.paar.hoeflich()
    }

    /// Anzahl noch nicht zugestellter Kandidaten
    pub fn wartende_kandidaten(&self) -> usize {
        self.wartende_kandidaten.len()
    }

    pub fn letzte_aktivitaet(&self) -> Instant {
        self.letzte_aktivitaet
    }

    /// Keine Aktivitaet seit mindestens `timeout`
    pub fn ist_inaktiv(&self, timeout: Duration, jetzt: Instant) -> bool {
        jetzt.saturating_duration_since(self.letzte_aktivitaet) >= timeout
    }

    /// Zustand aus Sicht von `id`, `None` wenn `id` nicht zum Paar gehoert
    pub fn seiten_zustand(&self, id: &ClientId) -> Option<SeitenZustand> {
        if !self.paar.enthaelt(id) {
            return None;
        }
        Some(match &self.zustand {
            SessionZustand::Idle => SeitenZustand::Idle,
            SessionZustand::HaveOffer { anbieter } if anbieter == id => {
                SeitenZustand::HaveLocalOffer
            }
            SessionZustand::HaveOffer { .. } => SeitenZustand::HaveRemoteOffer,
            SessionZustand::Stable => SeitenZustand::Stable,
            SessionZustand::Closed => SeitenZustand::Closed,
        })
    }

    /// Schliesst die Session ohne jemanden zu benachrichtigen
    ///
    /// Gibt die Anzahl verworfener Kandidaten zurueck.
    pub fn schliessen(&mut self) -> usize {
        self.zustand = SessionZustand::Closed;
        let verworfen = self.wartende_kandidaten.len();
        self.wartende_kandidaten.clear();
        verworfen
    }

    /// Verarbeitet ein Ereignis und liefert die Zustellungen in Reihenfolge
    ///
    /// Im Fehlerfall bleibt der Zustand unveraendert.
    pub fn verarbeiten(
        &mut self,
        ereignis: SessionEreignis,
        jetzt: Instant,
    ) -> NegotiationResult<Vec<Weiterleitung>> {
        if self.ist_geschlossen() {
            return Err(NegotiationError::SessionGeschlossen);
        }

        let von = ereignis.ausloeser().clone();
        let peer = self
            .paar
            .anderer(&von)
            .cloned()
            .ok_or_else(|| NegotiationError::FremderClient(von.clone()))?;

        let mut ausgaben = Vec::new();
        match ereignis {
            SessionEreignis::Offer { payload, .. } => {
                self.offer(von, peer, payload, &mut ausgaben);
            }
            SessionEreignis::Answer { payload, .. } => {
                self.answer(von, peer, payload, &mut ausgaben)?;
            }
            SessionEreignis::Kandidat { payload, .. } => {
                self.kandidat(von, peer, payload, &mut ausgaben)?;
            }
            SessionEreignis::Bye { .. } | SessionEreignis::PeerGetrennt { .. } => {
                let verworfen = self.schliessen();
                debug!(paar = %self.paar, ausloeser = %von, verworfen, "Session geschlossen");
                ausgaben.push(Weiterleitung {
                    envelope: Envelope::bye(von, peer.clone()),
                    an: peer,
                });
            }
        }

        self.letzte_aktivitaet = jetzt;
        Ok(ausgaben)
    }

    // -----------------------------------------------------------------------
    // Uebergaenge
    // -----------------------------------------------------------------------

    fn offer(
        &mut self,
        von: ClientId,
        peer: ClientId,
        payload: Value,
        ausgaben: &mut Vec<Weiterleitung>,
    ) {
        match &self.zustand {
            SessionZustand::HaveOffer { anbieter } if *anbieter == peer => {
                // Glare: beide Seiten haben ein Offer unterwegs
                if !ist_hoeflich(&peer, &von) {
                    debug!(
                        paar = %self.paar,
                        verworfen_von = %von,
                        "Glare: Offer der hoeflichen Seite verworfen"
                    );
                    return;
                }
                debug!(
                    paar = %self.paar,
                    gewinner = %von,
                    "Glare: hoefliche Seite zieht eigenes Offer zurueck"
                );
                // Das zurueckgezogene Offer gilt beim Gegenueber nicht mehr
                self.beschrieben.remove(&peer);
            }
            SessionZustand::HaveOffer { .. } => {
                trace!(paar = %self.paar, anbieter = %von, "Offer ersetzt vorheriges Offer");
            }
            _ => {}
        }

        self.zustand = SessionZustand::HaveOffer {
            anbieter: von.clone(),
        };
        ausgaben.push(Weiterleitung {
            an: peer.clone(),
            envelope: Envelope::weitergeleitet(
                AushandlungsArt::Offer,
                von.clone(),
                Some(peer.clone()),
                payload,
            ),
        });

        // Der Peer hat jetzt die Remote-Beschreibung von `von`. Kandidaten
        // des Peers gehen erst nach dessen Answer an `von`.
        self.beschrieben.insert(von.clone());
        self.kandidaten_freigeben(&von, &peer, ausgaben);
    }

    fn answer(
        &mut self,
        von: ClientId,
        peer: ClientId,
        payload: Value,
        ausgaben: &mut Vec<Weiterleitung>,
    ) -> NegotiationResult<()> {
        match &self.zustand {
            SessionZustand::HaveOffer { anbieter } if *anbieter == peer => {}
            andere => {
                return Err(NegotiationError::ProtokollVerletzung(format!(
                    "Answer von {von} im Zustand {andere}"
                )));
            }
        }

        self.zustand = SessionZustand::Stable;
        ausgaben.push(Weiterleitung {
            an: peer.clone(),
            envelope: Envelope::weitergeleitet(
                AushandlungsArt::Answer,
                von.clone(),
                Some(peer.clone()),
                payload,
            ),
        });

        self.beschrieben.insert(von.clone());
        self.kandidaten_freigeben(&von, &peer, ausgaben);
        Ok(())
    }

    fn kandidat(
        &mut self,
        von: ClientId,
        peer: ClientId,
        payload: Value,
        ausgaben: &mut Vec<Weiterleitung>,
    ) -> NegotiationResult<()> {
        if self.beschrieben.contains(&von) {
            ausgaben.push(Weiterleitung {
                an: peer.clone(),
                envelope: Envelope::weitergeleitet(
                    AushandlungsArt::IceCandidate,
                    von,
                    Some(peer),
                    payload,
                ),
            });
            return Ok(());
        }

        if self.wartende_kandidaten.len() >= MAX_GEPUFFERTE_KANDIDATEN {
            return Err(NegotiationError::KandidatenPufferVoll(
                MAX_GEPUFFERTE_KANDIDATEN,
            ));
        }
        trace!(paar = %self.paar, von = %von, "Kandidat gepuffert");
        self.wartende_kandidaten
            .push_back(GepufferterKandidat { von, payload });
        Ok(())
    }

    /// Stellt gepufferte Kandidaten von `absender` an `empfaenger` zu
    fn kandidaten_freigeben(
        &mut self,
        absender: &ClientId,
        empfaenger: &ClientId,
        ausgaben: &mut Vec<Weiterleitung>,
    ) {
        if self.wartende_kandidaten.is_empty() {
            return;
        }
        let mut uebrig = VecDeque::with_capacity(self.wartende_kandidaten.len());
        let mut freigegeben = 0usize;
        for kandidat in self.wartende_kandidaten.drain(..) {
            if &kandidat.von == absender {
                freigegeben += 1;
                ausgaben.push(Weiterleitung {
                    an: empfaenger.clone(),
                    envelope: Envelope::weitergeleitet(
                        AushandlungsArt::IceCandidate,
                        kandidat.von,
                        Some(empfaenger.clone()),
                        kandidat.payload,
                    ),
                });
            } else {
                uebrig.push_back(kandidat);
            }
        }
        self.wartende_kandidaten = uebrig;
        if freigegeben > 0 {
            debug!(paar = %self.paar, von = %absender, freigegeben, "Gepufferte Kandidaten zugestellt");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
