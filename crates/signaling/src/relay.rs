//! Signaling-Relay – Routet Client-Nachrichten
//!
//! Der Relay empfaengt rohe Frames eines Clients, dekodiert sie und
//! entscheidet:
//!
//! - `offer`/`answer`/`ice-candidate` mit `to` -> Session des Paars `{from, to}`,
//!   die State Machine bestimmt was weitergeleitet wird
//! - `offer`/`answer`/`ice-candidate` ohne `to` -> Discovery-Broadcast an alle
//!   anderen Clients, ohne Session
//! - `list-peers` -> `peers-list`
//! - `bye` -> an den Peer, Session des Paars wird geschlossen
//!
//! Fehler einzelner Nachrichten gehen als `error`-Envelope nur an den
//! Absender zurueck. Weiterleitungen sind nicht-blockierende Einreihungen
//! in die Ausgangs-Queue des Empfaengers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use treffpunkt_core::{ClientId, PaarSchluessel};
use treffpunkt_negotiation::{NegotiationSession, SessionEreignis, SessionZustand, Weiterleitung};
use treffpunkt_protocol::{
    dekodieren, AushandlungsArt, ClientNachricht, Envelope, FehlerGrund,
};

use crate::ausgang::Prioritaet;
use crate::error::{SignalingError, SignalingResult};
use crate::registry::{ClientRegistry, Verbindung};
use crate::sessions::{Anlegen, GeteilteSession, SessionEintrag, SessionTabelle};

// ---------------------------------------------------------------------------
// RelayStatistik
// ---------------------------------------------------------------------------

/// Zaehler des Relays, werden vom Metrik-Collector abgefragt
#[derive(Debug, Default)]
pub struct RelayStatistik {
    weitergeleitet: AtomicU64,
    abgelehnt: [AtomicU64; FehlerGrund::ALLE.len()],
    ueberlaeufe: AtomicU64,
}

/// Momentaufnahme der `RelayStatistik`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatistikSchnappschuss {
    pub weitergeleitet: u64,
    pub abgelehnt: Vec<(FehlerGrund, u64)>,
    pub ueberlaeufe: u64,
}

impl RelayStatistik {
    pub fn neu() -> Self {
        Self::default()
    }

    fn weitergeleitet(&self) {
        self.weitergeleitet.fetch_add(1, Ordering::Relaxed);
    }

    fn abgelehnt(&self, grund: FehlerGrund) {
        self.abgelehnt[grund.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn ueberlauf(&self) {
        self.ueberlaeufe.fetch_add(1, Ordering::Relaxed);
    }

    pub fn schnappschuss(&self) -> StatistikSchnappschuss {
        StatistikSchnappschuss {
            weitergeleitet: self.weitergeleitet.load(Ordering::Relaxed),
            abgelehnt: FehlerGrund::ALLE
                .iter()
                .map(|g| (*g, self.abgelehnt[g.index()].load(Ordering::Relaxed)))
                .collect(),
            ueberlaeufe: self.ueberlaeufe.load(Ordering::Relaxed),
        }
    }
}

/// Reiht ein Envelope beim Empfaenger ein
///
/// Ein bereits verschwundener Empfaenger ist kein Fehler: seine Sessions
/// raeumt der Lifecycle-Manager auf.
pub(crate) fn zustellen(
    registry: &ClientRegistry,
    statistik: &RelayStatistik,
    an: &ClientId,
    envelope: Envelope,
    prioritaet: Prioritaet,
) -> bool {
    let Some(handle) = registry.lookup(an) else {
        tracing::debug!(an = %an, typ = %envelope.typ, "Empfaenger nicht mehr verbunden");
        return false;
    };
    match handle.senden(envelope, prioritaet) {
        Ok(()) => true,
        Err(SignalingError::AusgangUeberlauf(_)) => {
            statistik.ueberlauf();
            false
        }
        Err(e) => {
            tracing::debug!(an = %an, fehler = %e, "Zustellung fehlgeschlagen");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// SignalingRelay
// ---------------------------------------------------------------------------

/// Zentraler Relay
///
/// Clone teilt Registry, Sessions und Statistik.
#[derive(Clone)]
pub struct SignalingRelay {
    registry: ClientRegistry,
    sessions: SessionTabelle,
    statistik: Arc<RelayStatistik>,
}

impl SignalingRelay {
    pub fn neu(
        registry: ClientRegistry,
        sessions: SessionTabelle,
        statistik: Arc<RelayStatistik>,
    ) -> Self {
        Self {
            registry,
            sessions,
            statistik,
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionTabelle {
        &self.sessions
    }

    pub fn statistik(&self) -> &Arc<RelayStatistik> {
        &self.statistik
    }

    // -----------------------------------------------------------------------
    // Verbindungsereignisse
    // -----------------------------------------------------------------------

    /// Registriert einen neuen Client und teilt ihm seine ID mit
    pub fn bei_verbindung(&self, peer_addr: Option<SocketAddr>) -> SignalingResult<Verbindung> {
        let verbindung = self.registry.registrieren(peer_addr)?;
        self.begruessen(&verbindung);
        Ok(verbindung)
    }

    /// Wie `bei_verbindung`, mit extern vergebener ID
    pub fn bei_verbindung_mit_id(
        &self,
        id: impl Into<String>,
        peer_addr: Option<SocketAddr>,
    ) -> SignalingResult<Verbindung> {
        let verbindung = self.registry.registrieren_mit_id(id, peer_addr)?;
        self.begruessen(&verbindung);
        Ok(verbindung)
    }

    fn begruessen(&self, verbindung: &Verbindung) {
        verbindung
            .ausgang
            .einreihen(Envelope::client_id(verbindung.id.clone()), Prioritaet::Kritisch);
    }

    /// Meldet einen Client ab, der Lifecycle-Manager schliesst seine Sessions
    pub fn bei_trennung(&self, id: &ClientId) {
        if self.registry.abmelden(id) {
            tracing::debug!(client_id = %id, "Client getrennt");
        }
    }

    // -----------------------------------------------------------------------
    // Nachrichten
    // -----------------------------------------------------------------------

    /// Verarbeitet einen rohen Frame von `von`
    pub fn bei_nachricht(&self, von: &ClientId, rohdaten: &[u8]) {
        let nachricht = match dekodieren(rohdaten) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(client_id = %von, fehler = %e, "Frame verworfen");
                self.fehler_melden(von, e.grund());
                return;
            }
        };

        match nachricht {
            ClientNachricht::Aushandlung {
                art,
                to: None,
                payload,
            } => self.entdeckung(von, art, payload),
            ClientNachricht::Aushandlung {
                art,
                to: Some(ziel),
                payload,
            } => self.aushandeln(von, ziel, art, payload),
            ClientNachricht::ListPeers => {
                let peers = self.registry.peers_auflisten(von);
                self.antworten(von, Envelope::peers_list(peers));
            }
            ClientNachricht::Bye { to: None } => {
                self.fehler_melden(von, FehlerGrund::UnknownTarget);
            }
            ClientNachricht::Bye { to: Some(ziel) } => self.beenden(von, ziel),
        }
    }

    /// Discovery-Broadcast: beruehrt keine Session
    fn entdeckung(&self, von: &ClientId, art: AushandlungsArt, payload: Value) {
        let empfaenger = self.registry.handles_ausser(von);
        tracing::debug!(
            client_id = %von,
            typ = %art.typ(),
            empfaenger = empfaenger.len(),
            "Discovery-Broadcast"
        );
        for handle in empfaenger {
            let envelope = Envelope::weitergeleitet(art, von.clone(), None, payload.clone());
            match handle.senden(envelope, Prioritaet::Verwerfbar) {
                Ok(()) => self.statistik.weitergeleitet(),
                Err(SignalingError::AusgangUeberlauf(_)) => self.statistik.ueberlauf(),
                Err(_) => {}
            }
        }
    }

    fn aushandeln(&self, von: &ClientId, ziel: ClientId, art: AushandlungsArt, payload: Value) {
        if !self.ziel_gueltig(von, &ziel) {
            return;
        }

        let paar = PaarSchluessel::neu(von.clone(), ziel.clone());
        let anlegen = match art {
            AushandlungsArt::Offer => Anlegen::AuchNachSchliessen,
            AushandlungsArt::IceCandidate => Anlegen::WennNeu,
            AushandlungsArt::Answer => Anlegen::Nie,
        };
        loop {
            let geteilt = match self.sessions.eintrag(&paar, anlegen) {
                SessionEintrag::Vorhanden(s) => s,
                SessionEintrag::Geschlossen => {
                    self.fehler_melden(von, FehlerGrund::SessionClosed);
                    return;
                }
                SessionEintrag::Keiner => {
                    tracing::debug!(client_id = %von, paar = %paar, "Answer ohne Session");
                    self.fehler_melden(von, FehlerGrund::ProtocolViolation);
                    return;
                }
            };

            let mut session = geteilt.lock();

            // Zwischen Nachschlagen und Lock geschlossen (Sweeper, Trennung):
            // ein Offer beginnt mit einer frischen Session
            if session.ist_geschlossen() && art == AushandlungsArt::Offer {
                drop(session);
                self.sessions.entfernen(&paar, &geteilt, false);
                tracing::debug!(paar = %paar, "Geschlossene Session fuer Offer ersetzt");
                continue;
            }

            // Ziel kann zwischen Pruefung und Lock verschwunden sein
            if !self.registry.enthaelt(&ziel) {
                self.verwaist_schliessen(&paar, &geteilt, &mut session, &ziel);
                self.fehler_melden(von, FehlerGrund::UnknownTarget);
                return;
            }

            let ereignis = SessionEreignis::aus_aushandlung(art, von.clone(), payload);
            match session.verarbeiten(ereignis, Instant::now()) {
                Ok(ausgaben) => {
                    if ausgaben.is_empty() {
                        tracing::debug!(client_id = %von, paar = %paar, typ = %art.typ(), "Nicht weitergeleitet");
                    }
                    // Unter dem Paar-Lock einreihen, damit die Reihenfolge erhalten bleibt
                    self.ausgaben_zustellen(ausgaben);
                }
                Err(e) => {
                    tracing::warn!(client_id = %von, paar = %paar, fehler = %e, "Aushandlung abgelehnt");
                    self.fehler_melden(von, e.grund());
                }
            }
            return;
        }
    }

    fn beenden(&self, von: &ClientId, ziel: ClientId) {
        if !self.ziel_gueltig(von, &ziel) {
            return;
        }

        let paar = PaarSchluessel::neu(von.clone(), ziel.clone());
        match self.sessions.eintrag(&paar, Anlegen::Nie) {
            SessionEintrag::Vorhanden(geteilt) => {
                let mut session = geteilt.lock();
                match session.verarbeiten(SessionEreignis::Bye { von: von.clone() }, Instant::now()) {
                    Ok(ausgaben) => {
                        self.ausgaben_zustellen(ausgaben);
                        self.sessions.entfernen(&paar, &geteilt, true);
                        tracing::info!(paar = %paar, ausloeser = %von, "Session per Bye beendet");
                    }
                    Err(e) => self.fehler_melden(von, e.grund()),
                }
            }
            SessionEintrag::Geschlossen => self.fehler_melden(von, FehlerGrund::SessionClosed),
            SessionEintrag::Keiner => {
                // Keine Session (mehr): Bye trotzdem zustellen
                if zustellen(
                    &self.registry,
                    &self.statistik,
                    &ziel,
                    Envelope::bye(von.clone(), ziel.clone()),
                    Prioritaet::Kritisch,
                ) {
                    self.statistik.weitergeleitet();
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn ziel_gueltig(&self, von: &ClientId, ziel: &ClientId) -> bool {
        if ziel == von || !self.registry.enthaelt(ziel) {
            tracing::debug!(client_id = %von, ziel = %ziel, "Unbekanntes Ziel");
            self.fehler_melden(von, FehlerGrund::UnknownTarget);
            return false;
        }
        true
    }

    /// Schliesst eine Session, deren Ziel waehrend der Verarbeitung verschwand
    ///
    /// War die Session schon aktiv, erhaelt der verbleibende Peer wie beim
    /// Lifecycle-Manager genau ein Bye.
    fn verwaist_schliessen(
        &self,
        paar: &PaarSchluessel,
        geteilt: &GeteilteSession,
        session: &mut NegotiationSession,
        verschwunden: &ClientId,
    ) {
        if session.ist_geschlossen() {
            return;
        }
        if *session.zustand() == SessionZustand::Idle {
            session.schliessen();
            self.sessions.entfernen(paar, geteilt, false);
            return;
        }
        let ereignis = SessionEreignis::PeerGetrennt {
            getrennt: verschwunden.clone(),
        };
        if let Ok(ausgaben) = session.verarbeiten(ereignis, Instant::now()) {
            self.ausgaben_zustellen(ausgaben);
        }
        self.sessions.entfernen(paar, geteilt, true);
    }

    fn ausgaben_zustellen(&self, ausgaben: Vec<Weiterleitung>) {
        for w in ausgaben {
            if zustellen(
                &self.registry,
                &self.statistik,
                &w.an,
                w.envelope,
                Prioritaet::Kritisch,
            ) {
                self.statistik.weitergeleitet();
            }
        }
    }

    fn antworten(&self, an: &ClientId, envelope: Envelope) {
        zustellen(
            &self.registry,
            &self.statistik,
            an,
            envelope,
            Prioritaet::Kritisch,
        );
    }

    fn fehler_melden(&self, an: &ClientId, grund: FehlerGrund) {
        self.statistik.abgelehnt(grund);
        self.antworten(an, Envelope::fehler(grund));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
