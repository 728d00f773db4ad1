//! Client-Registry – Wer ist verbunden, und wie erreicht man ihn
//!
//! Die Registry ist die einzige Stelle, die Client-Identitaeten besitzt. Jeder
//! Eintrag haelt die Ausgangs-Queue und das Trenn-Signal der Verbindung.
//! Sessions und Relay referenzieren Clients nur ueber ihre `ClientId`.
//!
//! Mutationen laufen pro Eintrag ueber die Shards der `DashMap`, nie ueber
//! ein globales Lock. Beim Abmelden werden registrierte Beobachter (der
//! Lifecycle-Manager) synchron benachrichtigt.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use treffpunkt_core::ClientId;
use treffpunkt_protocol::Envelope;

use crate::ausgang::{AusgangsQueue, EinreihenErgebnis, Prioritaet};
use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// ClientHandle
// ---------------------------------------------------------------------------

/// Handle auf einen verbundenen Client
#[derive(Clone)]
pub struct ClientHandle {
    pub id: ClientId,
    pub peer_addr: Option<SocketAddr>,
    ausgang: Arc<AusgangsQueue>,
    trennen: CancellationToken,
}

impl ClientHandle {
    /// Reiht ein Envelope in die Ausgangs-Queue des Clients ein
    ///
    /// Laeuft die Queue mit einem kritischen Envelope ueber, wird die
    /// Verbindung des Clients abgebrochen.
    pub fn senden(&self, envelope: Envelope, prioritaet: Prioritaet) -> SignalingResult<()> {
        match self.ausgang.einreihen(envelope, prioritaet) {
            EinreihenErgebnis::Eingereiht => Ok(()),
            EinreihenErgebnis::AeltesteVerworfen => {
                tracing::debug!(client_id = %self.id, "Ausgang voll – aeltester Broadcast verworfen");
                Ok(())
            }
            EinreihenErgebnis::Verworfen => {
                tracing::debug!(client_id = %self.id, "Ausgang voll – Broadcast verworfen");
                Ok(())
            }
            EinreihenErgebnis::Ueberlauf => {
                tracing::warn!(
                    client_id = %self.id,
                    kapazitaet = self.ausgang.kapazitaet(),
                    "Ausgang uebergelaufen – Verbindung wird getrennt"
                );
                self.trennen.cancel();
                Err(SignalingError::AusgangUeberlauf(self.id.clone()))
            }
            EinreihenErgebnis::Geschlossen => Err(SignalingError::VerbindungGetrennt),
        }
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("ausgang", &self.ausgang.laenge())
            .finish()
    }
}

/// Verbindungsseitige Haelfte einer Registrierung
///
/// Der Verbindungs-Task liest aus `ausgang` und beendet sich, sobald
/// `trennen` ausgeloest wird.
pub struct Verbindung {
    pub id: ClientId,
    pub ausgang: Arc<AusgangsQueue>,
    pub trennen: CancellationToken,
}

impl std::fmt::Debug for Verbindung {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verbindung")
            .field("id", &self.id)
            .field("ausgang", &self.ausgang.laenge())
            .field("trennen", &self.trennen)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Beobachter
// ---------------------------------------------------------------------------

/// Wird synchron nach jedem tatsaechlichen Abmelden aufgerufen
pub trait RegistryBeobachter: Send + Sync {
    fn client_entfernt(&self, id: &ClientId);
}

// ---------------------------------------------------------------------------
// ClientRegistry
// ---------------------------------------------------------------------------

/// Registry aller verbundenen Clients
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    clients: DashMap<ClientId, ClientHandle>,
    /// Reservierte Plaetze, wird vor dem Einfuegen erhoeht
    belegt: AtomicUsize,
    max_clients: usize,
    ausgang_kapazitaet: usize,
    beobachter: RwLock<Vec<Weak<dyn RegistryBeobachter>>>,
}

impl ClientRegistry {
    pub fn neu(max_clients: usize, ausgang_kapazitaet: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                clients: DashMap::new(),
                belegt: AtomicUsize::new(0),
                max_clients,
                ausgang_kapazitaet,
                beobachter: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Meldet einen Beobachter fuer Abmeldungen an
    pub fn beobachter_hinzufuegen(&self, beobachter: Weak<dyn RegistryBeobachter>) {
        self.inner.beobachter.write().push(beobachter);
    }

    /// Registriert einen neuen Client mit frisch vergebener ID
    pub fn registrieren(&self, peer_addr: Option<SocketAddr>) -> SignalingResult<Verbindung> {
        self.platz_reservieren()?;
        loop {
            let id = ClientId::neu();
            if let Entry::Vacant(frei) = self.inner.clients.entry(id.clone()) {
                let verbindung = self.eintragen(frei, id, peer_addr);
                return Ok(verbindung);
            }
        }
    }

    /// Registriert einen Client mit extern vergebener ID
    pub fn registrieren_mit_id(
        &self,
        roh: impl Into<String>,
        peer_addr: Option<SocketAddr>,
    ) -> SignalingResult<Verbindung> {
        let id = ClientId::pruefen(roh)?;
        self.platz_reservieren()?;
        match self.inner.clients.entry(id.clone()) {
            Entry::Vacant(frei) => Ok(self.eintragen(frei, id, peer_addr)),
            Entry::Occupied(_) => {
                self.inner.belegt.fetch_sub(1, Ordering::AcqRel);
                Err(SignalingError::IdVergeben(id))
            }
        }
    }

    fn platz_reservieren(&self) -> SignalingResult<()> {
        let max = self.inner.max_clients;
        self.inner
            .belegt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| SignalingError::RegistryVoll(max))
    }

    fn eintragen(
        &self,
        frei: dashmap::mapref::entry::VacantEntry<'_, ClientId, ClientHandle>,
        id: ClientId,
        peer_addr: Option<SocketAddr>,
    ) -> Verbindung {
        let ausgang = Arc::new(AusgangsQueue::neu(self.inner.ausgang_kapazitaet));
        let trennen = CancellationToken::new();
        frei.insert(ClientHandle {
            id: id.clone(),
            peer_addr,
            ausgang: Arc::clone(&ausgang),
            trennen: trennen.clone(),
        });
        tracing::debug!(client_id = %id, "Client registriert");
        Verbindung {
            id,
            ausgang,
            trennen,
        }
    }

    /// Entfernt einen Client, unbekannte IDs sind ein No-op
    ///
    /// Gibt `true` zurueck wenn der Client registriert war.
    pub fn abmelden(&self, id: &ClientId) -> bool {
        let Some((_, handle)) = self.inner.clients.remove(id) else {
            return false;
        };
        self.inner.belegt.fetch_sub(1, Ordering::AcqRel);
        handle.ausgang.schliessen();
        handle.trennen.cancel();
        tracing::debug!(client_id = %id, "Client abgemeldet");

        let beobachter: Vec<_> = self
            .inner
            .beobachter
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for b in beobachter {
            b.client_entfernt(id);
        }
        true
    }

    /// Liefert das Handle eines Clients
    pub fn lookup(&self, id: &ClientId) -> Option<ClientHandle> {
        self.inner.clients.get(id).map(|h| h.value().clone())
    }

    pub fn enthaelt(&self, id: &ClientId) -> bool {
        self.inner.clients.contains_key(id)
    }

    /// Momentaufnahme aller IDs ausser `ausser`
    pub fn peers_auflisten(&self, ausser: &ClientId) -> Vec<ClientId> {
        self.inner
            .clients
            .iter()
            .filter(|e| e.key() != ausser)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Handles aller Clients ausser `ausser`
    pub fn handles_ausser(&self, ausser: &ClientId) -> Vec<ClientHandle> {
        self.inner
            .clients
            .iter()
            .filter(|e| e.key() != ausser)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn anzahl(&self) -> usize {
        self.inner.clients.len()
    }

    pub fn max_clients(&self) -> usize {
        self.inner.max_clients
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
