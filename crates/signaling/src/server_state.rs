//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt Registry, Session-Tabelle, Relay und Lifecycle-Manager, die sicher
//! zwischen tokio-Tasks geteilt werden koennen.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::lifecycle::LifecycleManager;
use crate::registry::ClientRegistry;
use crate::relay::{RelayStatistik, SignalingRelay};
use crate::sessions::SessionTabelle;

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Maximale gleichzeitig registrierte Clients
    pub max_clients: usize,
    /// Kapazitaet der Ausgangs-Queue pro Client
    pub ausgang_kapazitaet: usize,
    /// Maximale Frame- bzw. Nachrichtengroesse in Bytes
    pub max_frame_groesse: usize,
    /// Verbindung ohne eingehende Nachricht oder Lebenszeichen wird danach
    /// getrennt, `None` schaltet den Timeout ab
    pub verbindungs_timeout: Option<Duration>,
    /// Sessions ohne Aktivitaet werden danach entfernt
    pub session_idle_timeout: Duration,
    /// Wie lange ein geschlossenes Paar mit `session-closed` antwortet
    pub nachlauf: Duration,
    /// Takt des Session-Sweepers
    pub sweep_intervall: Duration,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_clients: 1024,
            ausgang_kapazitaet: 128,
            max_frame_groesse: treffpunkt_protocol::wire::DEFAULT_MAX_FRAME_SIZE,
            verbindungs_timeout: None,
            session_idle_timeout: Duration::from_secs(300),
            nachlauf: Duration::from_secs(10),
            sweep_intervall: Duration::from_secs(5),
        }
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    pub config: Arc<SignalingConfig>,
    pub relay: SignalingRelay,
    /// Wird von der Registry nur schwach referenziert
    pub lifecycle: Arc<LifecycleManager>,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    pub fn neu(config: SignalingConfig) -> Arc<Self> {
        let registry = ClientRegistry::neu(config.max_clients, config.ausgang_kapazitaet);
        let sessions = SessionTabelle::neu(config.nachlauf);
        let statistik = Arc::new(RelayStatistik::neu());
        let lifecycle =
            LifecycleManager::neu(registry.clone(), sessions.clone(), Arc::clone(&statistik));
        let relay = SignalingRelay::neu(registry, sessions, statistik);

        Arc::new(Self {
            config: Arc::new(config),
            relay,
            lifecycle,
            start_time: Instant::now(),
        })
    }

    /// Startet den Session-Sweeper mit den konfigurierten Zeiten
    pub fn sweeper_starten(&self, shutdown_rx: tokio::sync::watch::Receiver<bool>) -> JoinHandle<()> {
        self.relay.sessions().sweeper_starten(
            self.config.sweep_intervall,
            self.config.session_idle_timeout,
            shutdown_rx,
        )
    }

    pub fn client_anzahl(&self) -> usize {
        self.relay.registry().anzahl()
    }

    pub fn session_anzahl(&self) -> usize {
        self.relay.sessions().anzahl()
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
