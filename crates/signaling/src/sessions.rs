//! Session-Tabelle – Aushandlungs-Sessions aller Client-Paare
//!
//! Jedes Paar hat sein eigenes `Mutex`, die Map selbst wird nur kurz zum
//! Klonen des `Arc` gesperrt. Unabhaengige Paare teilen sich nie ein Lock.
//!
//! Lock-Reihenfolge: Paar-Lock vor Map-Shard. Wer ueber die Map iteriert,
//! sammelt zuerst eine Momentaufnahme und sperrt die Paare danach.
//!
//! Geschlossene Paare hinterlassen fuer `nachlauf` einen Grabstein, damit
//! spaete Nachrichten `session-closed` statt einer neuen Session erzeugen.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use treffpunkt_core::{ClientId, PaarSchluessel};
use treffpunkt_negotiation::NegotiationSession;

/// Geteilte, einzeln gesperrte Session
pub type GeteilteSession = Arc<Mutex<NegotiationSession>>;

/// Wann `eintrag` eine neue Session anlegen darf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anlegen {
    /// Nur vorhandene Sessions (Answer, Bye)
    Nie,
    /// Neu anlegen, ausser das Paar wurde gerade geschlossen (Kandidaten)
    WennNeu,
    /// Auch nach einem Schliessen neu anlegen (Offer)
    AuchNachSchliessen,
}

/// Ergebnis eines Tabellen-Zugriffs
pub enum SessionEintrag {
    Vorhanden(GeteilteSession),
    /// Paar wurde vor kurzem geschlossen
    Geschlossen,
    Keiner,
}

/// Ergebnis eines Aufraeum-Laufs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AufraeumErgebnis {
    pub inaktive_sessions: usize,
    pub grabsteine: usize,
}

/// Alle aktiven Aushandlungs-Sessions
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct SessionTabelle {
    inner: Arc<TabelleInner>,
}

struct TabelleInner {
    sessions: DashMap<PaarSchluessel, GeteilteSession>,
    grabsteine: DashMap<PaarSchluessel, Instant>,
    nachlauf: Duration,
}

impl SessionTabelle {
    pub fn neu(nachlauf: Duration) -> Self {
        Self {
            inner: Arc::new(TabelleInner {
                sessions: DashMap::new(),
                grabsteine: DashMap::new(),
                nachlauf,
            }),
        }
    }

    /// Liefert die Session eines Paars und legt sie je nach `anlegen` an
    pub fn eintrag(&self, paar: &PaarSchluessel, anlegen: Anlegen) -> SessionEintrag {
        if let Some(session) = self.inner.sessions.get(paar) {
            return SessionEintrag::Vorhanden(Arc::clone(session.value()));
        }

        let jetzt = Instant::now();
        let begraben = self.ist_begraben(paar, jetzt);
        match anlegen {
            Anlegen::Nie if begraben => return SessionEintrag::Geschlossen,
            Anlegen::Nie => return SessionEintrag::Keiner,
            Anlegen::WennNeu if begraben => return SessionEintrag::Geschlossen,
            Anlegen::WennNeu => {}
            Anlegen::AuchNachSchliessen => {
                if self.inner.grabsteine.remove(paar).is_some() {
                    tracing::debug!(paar = %paar, "Neues Offer nach Schliessen – Grabstein entfernt");
                }
            }
        }

        let session = match self.inner.sessions.entry(paar.clone()) {
            Entry::Occupied(vorhanden) => Arc::clone(vorhanden.get()),
            Entry::Vacant(frei) => {
                let neu = Arc::new(Mutex::new(NegotiationSession::neu(paar.clone(), jetzt)));
                frei.insert(Arc::clone(&neu));
                tracing::debug!(paar = %paar, "Session angelegt");
                neu
            }
        };
        SessionEintrag::Vorhanden(session)
    }

    /// Entfernt genau diese Session-Instanz aus der Tabelle
    ///
    /// Mit `grabstein` antworten spaete Nachrichten fuer `nachlauf` mit
    /// `session-closed`.
    pub fn entfernen(&self, paar: &PaarSchluessel, session: &GeteilteSession, grabstein: bool) {
        let entfernt = self
            .inner
            .sessions
            .remove_if(paar, |_, vorhanden| Arc::ptr_eq(vorhanden, session))
            .is_some();
        if entfernt && grabstein {
            self.inner
                .grabsteine
                .insert(paar.clone(), Instant::now() + self.inner.nachlauf);
        }
    }

    fn ist_begraben(&self, paar: &PaarSchluessel, jetzt: Instant) -> bool {
        self.inner
            .grabsteine
            .get(paar)
            .is_some_and(|bis| *bis.value() > jetzt)
    }

    /// Momentaufnahme aller Sessions, an denen `id` beteiligt ist
    pub fn sessions_von(&self, id: &ClientId) -> Vec<(PaarSchluessel, GeteilteSession)> {
        self.inner
            .sessions
            .iter()
            .filter(|e| e.key().enthaelt(id))
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    /// Entfernt inaktive Sessions still und abgelaufene Grabsteine
    ///
    /// Idle-Eviction benachrichtigt niemanden und hinterlaesst keinen
    /// Grabstein: eine spaete Nachricht startet einfach neu.
    pub fn aufraeumen(&self, idle_timeout: Duration, jetzt: Instant) -> AufraeumErgebnis {
        let kandidaten: Vec<_> = self
            .inner
            .sessions
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut ergebnis = AufraeumErgebnis::default();
        for (paar, session) in kandidaten {
            let mut gesperrt = session.lock();
            if gesperrt.ist_geschlossen() || gesperrt.ist_inaktiv(idle_timeout, jetzt) {
                let verworfen = gesperrt.schliessen();
                self.entfernen(&paar, &session, false);
                ergebnis.inaktive_sessions += 1;
                tracing::debug!(paar = %paar, verworfen, "Inaktive Session entfernt");
            }
        }

        let vorher = self.inner.grabsteine.len();
        self.inner.grabsteine.retain(|_, bis| *bis > jetzt);
        ergebnis.grabsteine = vorher.saturating_sub(self.inner.grabsteine.len());
        ergebnis
    }

    /// Anzahl aktiver Sessions
    pub fn anzahl(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Startet den periodischen Aufraeum-Task
    pub fn sweeper_starten(
        &self,
        intervall: Duration,
        idle_timeout: Duration,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let tabelle = self.clone();
        tokio::spawn(async move {
            let mut takt = tokio::time::interval(intervall);
            takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = takt.tick() => {
                        let ergebnis = tabelle.aufraeumen(idle_timeout, Instant::now());
                        if ergebnis.inaktive_sessions > 0 {
                            tracing::info!(
                                entfernt = ergebnis.inaktive_sessions,
                                aktiv = tabelle.anzahl(),
                                "Inaktive Sessions entfernt"
                            );
                        }
                    }
                    Ok(()) = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Session-Sweeper gestoppt");
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use treffpunkt_negotiation::{SessionEreignis, SessionZustand};

    fn paar() -> PaarSchluessel {
        PaarSchluessel::neu("a".into(), "b".into())
    }

    fn vorhanden(e: SessionEintrag) -> GeteilteSession {
        match e {
            SessionEintrag::Vorhanden(s) => s,
            SessionEintrag::Geschlossen => panic!("unerwartet: Geschlossen"),
            SessionEintrag::Keiner => panic!("unerwartet: Keiner"),
        }
    }

    #[test]
    fn eintrag_legt_nur_bei_bedarf_an() {
        let tabelle = SessionTabelle::neu(Duration::from_secs(10));
        assert!(matches!(
            tabelle.eintrag(&paar(), Anlegen::Nie),
            SessionEintrag::Keiner
        ));
        assert_eq!(tabelle.anzahl(), 0);

        let s1 = vorhanden(tabelle.eintrag(&paar(), Anlegen::WennNeu));
        let s2 = vorhanden(tabelle.eintrag(&paar(), Anlegen::Nie));
        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(tabelle.anzahl(), 1);
    }

    #[test]
    fn grabstein_nach_schliessen() {
        let tabelle = SessionTabelle::neu(Duration::from_secs(10));
        let s = vorhanden(tabelle.eintrag(&paar(), Anlegen::WennNeu));
        tabelle.entfernen(&paar(), &s, true);
        assert_eq!(tabelle.anzahl(), 0);

        assert!(matches!(
            tabelle.eintrag(&paar(), Anlegen::Nie),
            SessionEintrag::Geschlossen
        ));
        assert!(matches!(
            tabelle.eintrag(&paar(), Anlegen::WennNeu),
            SessionEintrag::Geschlossen
        ));

        // Ein neues Offer beginnt eine neue Session
        let neu = vorhanden(tabelle.eintrag(&paar(), Anlegen::AuchNachSchliessen));
        assert!(!Arc::ptr_eq(&s, &neu));
        assert_eq!(*neu.lock().zustand(), SessionZustand::Idle);
    }

    #[test]
    fn entfernen_trifft_nur_dieselbe_instanz() {
        let tabelle = SessionTabelle::neu(Duration::from_secs(10));
        let alt = vorhanden(tabelle.eintrag(&paar(), Anlegen::WennNeu));
        tabelle.entfernen(&paar(), &alt, false);
        let neu = vorhanden(tabelle.eintrag(&paar(), Anlegen::WennNeu));

        // Veraltete Instanz darf die neue nicht entfernen
        tabelle.entfernen(&paar(), &alt, true);
        assert_eq!(tabelle.anzahl(), 1);
        assert!(Arc::ptr_eq(
            &neu,
            &vorhanden(tabelle.eintrag(&paar(), Anlegen::Nie))
        ));
    }

    #[test]
    fn sessions_von_filtert_nach_client() {
        let tabelle = SessionTabelle::neu(Duration::from_secs(10));
        for (x, y) in [("a", "b"), ("a", "c"), ("b", "c")] {
            tabelle.eintrag(&PaarSchluessel::neu(x.into(), y.into()), Anlegen::WennNeu);
        }
        assert_eq!(tabelle.sessions_von(&"a".into()).len(), 2);
        assert_eq!(tabelle.sessions_von(&"c".into()).len(), 2);
        assert_eq!(tabelle.sessions_von(&"d".into()).len(), 0);
    }

    #[test]
    fn aufraeumen_entfernt_inaktive_und_alte_grabsteine() {
        let tabelle = SessionTabelle::neu(Duration::from_secs(5));
        let aktiv_paar = PaarSchluessel::neu("a".into(), "c".into());
        let _inaktiv = vorhanden(tabelle.eintrag(&paar(), Anlegen::WennNeu));
        let aktiv = vorhanden(tabelle.eintrag(&aktiv_paar, Anlegen::WennNeu));

        let spaeter = Instant::now() + Duration::from_secs(60);
        aktiv
            .lock()
            .verarbeiten(
                SessionEreignis::Offer {
                    von: "a".into(),
                    payload: json!({}),
                },
                spaeter,
            )
            .unwrap();

        let ergebnis = tabelle.aufraeumen(Duration::from_secs(30), spaeter);
        assert_eq!(ergebnis.inaktive_sessions, 1);
        assert_eq!(tabelle.anzahl(), 1);

        // Idle-Eviction hinterlaesst keinen Grabstein
        assert!(matches!(
            tabelle.eintrag(&paar(), Anlegen::Nie),
            SessionEintrag::Keiner
        ));

        tabelle.entfernen(&aktiv_paar, &aktiv, true);
        let ergebnis = tabelle.aufraeumen(Duration::from_secs(30), spaeter + Duration::from_secs(10));
        assert_eq!(ergebnis.grabsteine, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_laeuft_bis_shutdown() {
        let tabelle = SessionTabelle::neu(Duration::from_secs(1));
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tabelle.sweeper_starten(Duration::from_secs(1), Duration::from_secs(30), rx);

        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
