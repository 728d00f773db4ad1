//! Ausgangs-Queue – begrenzter Puffer zwischen Relay und Verbindungs-Task
//!
//! Der Relay reiht Envelopes nicht-blockierend ein, der Verbindungs-Task des
//! Empfaengers holt sie ab und schreibt sie auf den Transport.
//!
//! ## Ueberlaufverhalten
//! - `Verwerfbar` (Discovery-Broadcasts): verdraengt bei voller Queue den
//!   aeltesten verwerfbaren Eintrag, sonst wird es selbst verworfen.
//! - `Kritisch` (Aushandlung, Bye, Server-Antworten): verdraengt den
//!   aeltesten verwerfbaren Eintrag. Gibt es keinen, laeuft die Queue ueber
//!   und wird geschlossen. Der Aufrufer trennt dann die Verbindung.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use treffpunkt_protocol::Envelope;

/// Zustellprioritaet eines Envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prioritaet {
    Kritisch,
    Verwerfbar,
}

/// Ergebnis von `AusgangsQueue::einreihen`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EinreihenErgebnis {
    Eingereiht,
    /// Eingereiht, dafuer wurde der aelteste verwerfbare Eintrag entfernt
    AeltesteVerworfen,
    /// Neues verwerfbares Envelope wurde nicht eingereiht
    Verworfen,
    /// Kritisches Envelope passt nicht mehr, Queue ist jetzt geschlossen
    Ueberlauf,
    /// Queue war bereits geschlossen
    Geschlossen,
}

struct QueueInner {
    eintraege: VecDeque<(Prioritaet, Envelope)>,
    geschlossen: bool,
}

/// Begrenzte Ausgangs-Queue eines Clients (ein Leser, viele Schreiber)
pub struct AusgangsQueue {
    inner: Mutex<QueueInner>,
    signal: Notify,
    kapazitaet: usize,
}

impl AusgangsQueue {
    pub fn neu(kapazitaet: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                eintraege: VecDeque::with_capacity(kapazitaet.min(64)),
                geschlossen: false,
            }),
            signal: Notify::new(),
            kapazitaet: kapazitaet.max(1),
        }
    }

    /// Reiht ein Envelope ein, blockiert nie
    pub fn einreihen(&self, envelope: Envelope, prioritaet: Prioritaet) -> EinreihenErgebnis {
        let ergebnis = {
            let mut inner = self.inner.lock();
            if inner.geschlossen {
                return EinreihenErgebnis::Geschlossen;
            }

            let ergebnis = if inner.eintraege.len() < self.kapazitaet {
                EinreihenErgebnis::Eingereiht
            } else {
                let aelteste_verwerfbare = inner
                    .eintraege
                    .iter()
                    .position(|(p, _)| *p == Prioritaet::Verwerfbar);
                match (aelteste_verwerfbare, prioritaet) {
                    (Some(index), _) => {
                        inner.eintraege.remove(index);
                        EinreihenErgebnis::AeltesteVerworfen
                    }
                    (None, Prioritaet::Verwerfbar) => return EinreihenErgebnis::Verworfen,
                    (None, Prioritaet::Kritisch) => {
                        inner.geschlossen = true;
                        inner.eintraege.clear();
                        EinreihenErgebnis::Ueberlauf
                    }
                }
            };

            if ergebnis != EinreihenErgebnis::Ueberlauf {
                inner.eintraege.push_back((prioritaet, envelope));
            }
            ergebnis
        };

        self.signal.notify_one();
        ergebnis
    }

    /// Naechstes Envelope ohne zu warten
    pub fn versuche_naechste(&self) -> Option<Envelope> {
        self.inner.lock().eintraege.pop_front().map(|(_, e)| e)
    }

    /// Wartet auf das naechste Envelope
    ///
    /// Gibt `None` zurueck sobald die Queue geschlossen und leer ist.
    pub async fn naechste(&self) -> Option<Envelope> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some((_, envelope)) = inner.eintraege.pop_front() {
                    return Some(envelope);
                }
                if inner.geschlossen {
                    return None;
                }
            }
            self.signal.notified().await;
        }
    }

    /// Schliesst die Queue, bereits eingereihte Envelopes bleiben abholbar
    pub fn schliessen(&self) {
        self.inner.lock().geschlossen = true;
        self.signal.notify_one();
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.inner.lock().geschlossen
    }

    pub fn laenge(&self) -> usize {
        self.inner.lock().eintraege.len()
    }

    pub fn kapazitaet(&self) -> usize {
        self.kapazitaet
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use treffpunkt_core::ClientId;
    use treffpunkt_protocol::FehlerGrund;

    fn env(n: usize) -> Envelope {
        Envelope::client_id(ClientId::from(format!("c{n}")))
    }

    fn id_von(e: &Envelope) -> String {
        e.id.as_ref().map(|i| i.to_string()).unwrap_or_default()
    }

    #[test]
    fn fifo_reihenfolge() {
        let q = AusgangsQueue::neu(8);
        for n in 0..3 {
            assert_eq!(q.einreihen(env(n), Prioritaet::Kritisch), EinreihenErgebnis::Eingereiht);
        }
        let ids: Vec<_> = std::iter::from_fn(|| q.versuche_naechste())
            .map(|e| id_von(&e))
            .collect();
        assert_eq!(ids, vec!["c0", "c1", "c2"]);
    }

    #[test]
    fn verwerfbare_weichen_zuerst() {
        let q = AusgangsQueue::neu(3);
        q.einreihen(env(0), Prioritaet::Kritisch);
        q.einreihen(env(1), Prioritaet::Verwerfbar);
        q.einreihen(env(2), Prioritaet::Verwerfbar);

        // Kritisch verdraengt den aeltesten verwerfbaren Eintrag (c1)
        assert_eq!(
            q.einreihen(env(3), Prioritaet::Kritisch),
            EinreihenErgebnis::AeltesteVerworfen
        );
        // Verwerfbar verdraengt den naechsten verwerfbaren (c2)
        assert_eq!(
            q.einreihen(env(4), Prioritaet::Verwerfbar),
            EinreihenErgebnis::AeltesteVerworfen
        );

        let ids: Vec<_> = std::iter::from_fn(|| q.versuche_naechste())
            .map(|e| id_von(&e))
            .collect();
        assert_eq!(ids, vec!["c0", "c3", "c4"]);
    }

    #[test]
    fn verwerfbar_bei_nur_kritischen_wird_verworfen() {
        let q = AusgangsQueue::neu(2);
        q.einreihen(env(0), Prioritaet::Kritisch);
        q.einreihen(env(1), Prioritaet::Kritisch);
        assert_eq!(
            q.einreihen(env(2), Prioritaet::Verwerfbar),
            EinreihenErgebnis::Verworfen
        );
        assert_eq!(q.laenge(), 2);
        assert!(!q.ist_geschlossen());
    }

    #[test]
    fn kritischer_ueberlauf_schliesst_queue() {
        let q = AusgangsQueue::neu(2);
        q.einreihen(env(0), Prioritaet::Kritisch);
        q.einreihen(env(1), Prioritaet::Kritisch);
        assert_eq!(
            q.einreihen(Envelope::fehler(FehlerGrund::BadJson), Prioritaet::Kritisch),
            EinreihenErgebnis::Ueberlauf
        );
        assert!(q.ist_geschlossen());
        assert_eq!(
            q.einreihen(env(3), Prioritaet::Kritisch),
            EinreihenErgebnis::Geschlossen
        );
    }

    #[tokio::test]
    async fn naechste_wartet_auf_einreihen() {
        let q = Arc::new(AusgangsQueue::neu(4));
        let leser = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.naechste().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.einreihen(env(7), Prioritaet::Kritisch);

        let empfangen = leser.await.unwrap().expect("Envelope erwartet");
        assert_eq!(id_von(&empfangen), "c7");
    }

    #[tokio::test]
    async fn schliessen_beendet_leser_nach_leeren() {
        let q = AusgangsQueue::neu(4);
        q.einreihen(env(1), Prioritaet::Kritisch);
        q.schliessen();
        assert!(q.naechste().await.is_some());
        assert!(q.naechste().await.is_none());
    }
}
