//! Lifecycle-Manager – Raeumt Sessions verschwundener Clients auf
//!
//! Haengt als Beobachter an der Registry. Wird ein Client abgemeldet,
//! schliesst der Manager jede Session, an der er beteiligt war, und
//! schickt jedem verbleibenden Peer genau ein `bye` im Namen des
//! verschwundenen Clients. So wartet niemand auf eine Answer, die nie kommt.

use std::sync::{Arc, Weak};
use std::time::Instant;

use treffpunkt_core::ClientId;
use treffpunkt_negotiation::SessionEreignis;

use crate::ausgang::Prioritaet;
use crate::registry::{ClientRegistry, RegistryBeobachter};
use crate::relay::{zustellen, RelayStatistik};
use crate::sessions::SessionTabelle;

pub struct LifecycleManager {
    registry: ClientRegistry,
    sessions: SessionTabelle,
    statistik: Arc<RelayStatistik>,
}

impl LifecycleManager {
    /// Erstellt den Manager und meldet ihn bei der Registry an
    ///
    /// Die Registry haelt nur eine schwache Referenz: der Aufrufer muss
    /// den zurueckgegebenen `Arc` am Leben halten.
    pub fn neu(
        registry: ClientRegistry,
        sessions: SessionTabelle,
        statistik: Arc<RelayStatistik>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            registry: registry.clone(),
            sessions,
            statistik,
        });
        let schwach = Arc::downgrade(&manager);
        let beobachter: Weak<dyn RegistryBeobachter> = schwach;
        registry.beobachter_hinzufuegen(beobachter);
        manager
    }

    /// Schliesst alle Sessions von `id`, gibt die Anzahl zurueck
    pub fn bei_client_entfernt(&self, id: &ClientId) -> usize {
        let mut geschlossen = 0;
        for (paar, geteilt) in self.sessions.sessions_von(id) {
            let mut session = geteilt.lock();
            if session.ist_geschlossen() {
                // Bereits vom Relay oder per Bye geschlossen
                self.sessions.entfernen(&paar, &geteilt, true);
                continue;
            }

            let ereignis = SessionEreignis::PeerGetrennt {
                getrennt: id.clone(),
            };
            match session.verarbeiten(ereignis, Instant::now()) {
                Ok(ausgaben) => {
                    for w in ausgaben {
                        zustellen(
                            &self.registry,
                            &self.statistik,
                            &w.an,
                            w.envelope,
                            Prioritaet::Kritisch,
                        );
                    }
                }
                Err(e) => {
                    tracing::debug!(paar = %paar, fehler = %e, "Session beim Trennen nicht schliessbar");
                }
            }
            self.sessions.entfernen(&paar, &geteilt, true);
            geschlossen += 1;
        }

        if geschlossen > 0 {
            tracing::info!(client_id = %id, sessions = geschlossen, "Sessions des getrennten Clients geschlossen");
        }
        geschlossen
    }
}

impl RegistryBeobachter for LifecycleManager {
    fn client_entfernt(&self, id: &ClientId) {
        self.bei_client_entfernt(id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
