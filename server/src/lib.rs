//! treffpunkt-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use config::ServerConfig;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use treffpunkt_observability::{HealthState, RelayKennzahlen, TreffpunktMetrics};
use treffpunkt_signaling::{SignalingServer, SignalingState, WebSocketServer};

/// Takt, in dem die Relay-Zaehler in die Prometheus-Metriken wandern
const METRIK_INTERVALL: Duration = Duration::from_secs(1);

/// Maximale Wartezeit auf die Tasks beim Herunterfahren
const SHUTDOWN_FRIST: Duration = Duration::from_secs(5);

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

/// Server mit gebundenen Listenern, bereit zum Laufen
pub struct GebundenerServer {
    config: ServerConfig,
    state: Arc<SignalingState>,
    tcp: SignalingServer,
    ws: Option<WebSocketServer>,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bindet alle Listener, startet aber noch nichts
    pub async fn binden(self) -> Result<GebundenerServer> {
        let state = SignalingState::neu(self.config.signaling_config());

        let tcp = SignalingServer::binden(Arc::clone(&state), self.config.tcp_bind_adresse()?).await?;
        let ws = if self.config.netzwerk.ws_aktiviert {
            Some(WebSocketServer::binden(Arc::clone(&state), self.config.ws_bind_adresse()?).await?)
        } else {
            None
        };

        Ok(GebundenerServer {
            config: self.config,
            state,
            tcp,
            ws,
        })
    }

    /// Startet alle Server-Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let gebunden = self.binden().await?;
        gebunden
            .laufen(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(fehler = %e, "Ctrl-C-Handler nicht verfuegbar");
                }
            })
            .await
    }
}

impl GebundenerServer {
    pub fn state(&self) -> &Arc<SignalingState> {
        &self.state
    }

    pub fn tcp_adresse(&self) -> std::io::Result<SocketAddr> {
        self.tcp.lokale_adresse()
    }

    pub fn ws_adresse(&self) -> Option<std::io::Result<SocketAddr>> {
        self.ws.as_ref().map(|ws| ws.lokale_adresse())
    }

    /// Laeuft bis `shutdown` fertig ist
    ///
    /// Reihenfolge:
    /// 1. TCP- und WebSocket-Listener starten
    /// 2. Session-Sweeper starten
    /// 3. Observability-Server und Metrik-Collector starten
    /// 4. Auf das Shutdown-Signal warten, dann alle Tasks stoppen
    pub async fn laufen(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tracing::info!(
            server_name = %self.config.server.name,
            tcp = ?self.tcp.lokale_adresse().ok(),
            websocket = ?self.ws.as_ref().and_then(|ws| ws.lokale_adresse().ok()),
            max_clients = self.config.server.max_clients,
            "Server startet"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let tcp = self.tcp;
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = tcp.starten(rx).await {
                tracing::error!(fehler = %e, "TCP Signaling-Server beendet mit Fehler");
            }
        }));

        if let Some(ws) = self.ws {
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = ws.starten(rx).await {
                    tracing::error!(fehler = %e, "WebSocket Signaling-Server beendet mit Fehler");
                }
            }));
        }

        tasks.push(self.state.sweeper_starten(shutdown_rx.clone()));

        if self.config.observability.aktiviert {
            let metriken = TreffpunktMetrics::neu()?;
            let health = HealthState::neu(metriken.clone(), self.config.server.max_clients);
            let adresse = self.config.observability_bind_adresse()?;

            tasks.push(metrik_collector_starten(
                Arc::clone(&self.state),
                metriken.clone(),
                shutdown_rx.clone(),
            ));

            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = treffpunkt_observability::observability_server_starten(
                    adresse, metriken, health, rx,
                )
                .await
                {
                    tracing::error!(fehler = %e, "Observability-Server beendet mit Fehler");
                }
            }));
        }

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        shutdown.await;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        let _ = shutdown_tx.send(true);
        let alle = alle_abwarten(tasks);
        if tokio::time::timeout(SHUTDOWN_FRIST, alle).await.is_err() {
            tracing::warn!("Nicht alle Tasks rechtzeitig beendet");
        }

        tracing::info!(
            uptime_sek = self.state.uptime_sek(),
            "Server beendet"
        );
        Ok(())
    }
}

async fn alle_abwarten(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(fehler = %e, "Task abgebrochen");
        }
    }
}

/// Momentaufnahme des Relays fuer die Prometheus-Metriken
pub fn kennzahlen(state: &SignalingState) -> RelayKennzahlen {
    let statistik = state.relay.statistik().schnappschuss();
    RelayKennzahlen {
        verbundene_clients: state.client_anzahl(),
        aktive_sessions: state.session_anzahl(),
        weitergeleitet: statistik.weitergeleitet,
        abgelehnt: statistik
            .abgelehnt
            .into_iter()
            .map(|(grund, anzahl)| (grund.als_str(), anzahl))
            .collect(),
        ueberlaeufe: statistik.ueberlaeufe,
    }
}

fn metrik_collector_starten(
    state: Arc<SignalingState>,
    metriken: TreffpunktMetrics,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut takt = tokio::time::interval(METRIK_INTERVALL);
        loop {
            tokio::select! {
                _ = takt.tick() => metriken.aktualisieren(&kennzahlen(&state)),
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
