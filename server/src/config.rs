//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use treffpunkt_observability::logging;
use treffpunkt_signaling::SignalingConfig;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Relay-Einstellungen (Queues, Sessions, Timeouts)
    pub relay: RelayEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitig registrierter Clients
    pub max_clients: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Treffpunkt".into(),
            max_clients: 1024,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer alle Listener
    pub bind_adresse: String,
    /// Port fuer laengenpraefixiertes JSON ueber TCP
    pub tcp_port: u16,
    /// Port fuer WebSocket
    pub ws_port: u16,
    /// WebSocket-Listener starten
    pub ws_aktiviert: bool,
    /// Maximale Frame- bzw. Nachrichtengroesse in Bytes
    pub max_frame_groesse: usize,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 9870,
            ws_port: 9871,
            ws_aktiviert: true,
            max_frame_groesse: 64 * 1024,
        }
    }
}

/// Relay-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayEinstellungen {
    /// Kapazitaet der Ausgangs-Queue pro Client
    pub ausgang_kapazitaet: usize,
    /// Sessions ohne Aktivitaet werden danach still entfernt
    pub session_idle_timeout_sek: u64,
    /// Wie lange ein geschlossenes Paar mit `session-closed` antwortet
    pub nachlauf_sek: u64,
    /// Takt des Session-Sweepers
    pub sweep_intervall_sek: u64,
    /// Verbindung ohne eingehende Nachricht wird danach getrennt, 0 = nie
    pub verbindungs_timeout_sek: u64,
}

impl Default for RelayEinstellungen {
    fn default() -> Self {
        Self {
            ausgang_kapazitaet: 128,
            session_idle_timeout_sek: 300,
            nachlauf_sek: 10,
            sweep_intervall_sek: 5,
            verbindungs_timeout_sek: 0,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9872)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9872,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str::<Self>(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.pruefen()?;
        Ok(config)
    }

    /// Weist Werte zurueck, mit denen der Relay nicht arbeiten kann
    pub fn pruefen(&self) -> anyhow::Result<()> {
        if self.server.max_clients == 0 {
            anyhow::bail!("server.max_clients muss groesser als 0 sein");
        }
        if self.relay.ausgang_kapazitaet == 0 {
            anyhow::bail!("relay.ausgang_kapazitaet muss groesser als 0 sein");
        }
        if self.relay.sweep_intervall_sek == 0 {
            anyhow::bail!("relay.sweep_intervall_sek muss groesser als 0 sein");
        }
        if self.netzwerk.max_frame_groesse == 0 {
            anyhow::bail!("netzwerk.max_frame_groesse muss groesser als 0 sein");
        }
        if !logging::log_level_gueltig(&self.logging.level) {
            anyhow::bail!(
                "logging.level '{}' ungueltig (trace, debug, info, warn, error)",
                self.logging.level
            );
        }
        if !logging::log_format_gueltig(&self.logging.format) {
            anyhow::bail!(
                "logging.format '{}' ungueltig (text, json)",
                self.logging.format
            );
        }
        Ok(())
    }

    /// Einstellungen fuer den Signaling-Service
    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            max_clients: self.server.max_clients,
            ausgang_kapazitaet: self.relay.ausgang_kapazitaet,
            max_frame_groesse: self.netzwerk.max_frame_groesse,
            verbindungs_timeout: match self.relay.verbindungs_timeout_sek {
                0 => None,
                sek => Some(Duration::from_secs(sek)),
            },
            session_idle_timeout: Duration::from_secs(self.relay.session_idle_timeout_sek),
            nachlauf: Duration::from_secs(self.relay.nachlauf_sek),
            sweep_intervall: Duration::from_secs(self.relay.sweep_intervall_sek),
        }
    }

    fn adresse(&self, port: u16) -> anyhow::Result<SocketAddr> {
        let text = format!("{}:{}", self.netzwerk.bind_adresse, port);
        text.parse()
            .with_context(|| format!("Ungueltige Bind-Adresse '{text}'"))
    }

    /// Bind-Adresse fuer den TCP-Listener
    pub fn tcp_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        self.adresse(self.netzwerk.tcp_port)
    }

    /// Bind-Adresse fuer den WebSocket-Listener
    pub fn ws_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        self.adresse(self.netzwerk.ws_port)
    }

    /// Bind-Adresse fuer den Observability-Server
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        self.adresse(self.observability.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert!(cfg.pruefen().is_ok());
        assert_eq!(cfg.server.max_clients, 1024);
        assert_eq!(cfg.netzwerk.tcp_port, 9870);
        assert_eq!(cfg.relay.ausgang_kapazitaet, 128);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.tcp_bind_adresse().unwrap().to_string(), "0.0.0.0:9870");
        assert_eq!(cfg.ws_bind_adresse().unwrap().to_string(), "0.0.0.0:9871");
        assert_eq!(
            cfg.observability_bind_adresse().unwrap().to_string(),
            "0.0.0.0:9872"
        );
    }

    #[test]
    fn ungueltige_bind_adresse_ist_fehler() {
        let mut cfg = ServerConfig::default();
        cfg.netzwerk.bind_adresse = "kein-host".into();
        assert!(cfg.tcp_bind_adresse().is_err());
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            name = "Mein Treffpunkt"
            max_clients = 100

            [relay]
            nachlauf_sek = 30
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.name, "Mein Treffpunkt");
        assert_eq!(cfg.server.max_clients, 100);
        assert_eq!(cfg.relay.nachlauf_sek, 30);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.relay.session_idle_timeout_sek, 300);
        assert!(cfg.netzwerk.ws_aktiviert);
    }

    #[test]
    fn signaling_config_uebernimmt_zeiten() {
        let mut cfg = ServerConfig::default();
        cfg.relay.verbindungs_timeout_sek = 15;
        let signaling = cfg.signaling_config();
        assert_eq!(signaling.verbindungs_timeout, Some(Duration::from_secs(15)));
        assert_eq!(signaling.nachlauf, Duration::from_secs(10));
        assert_eq!(signaling.max_frame_groesse, 64 * 1024);
    }

    #[test]
    fn verbindungs_timeout_ist_standardmaessig_aus() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.relay.verbindungs_timeout_sek, 0);
        assert_eq!(cfg.signaling_config().verbindungs_timeout, None);
    }

    #[test]
    fn null_kapazitaet_wird_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.relay.ausgang_kapazitaet = 0;
        assert!(cfg.pruefen().is_err());
    }

    #[test]
    fn ungueltiges_logging_wird_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.logging.level = "verbose".into();
        assert!(cfg.pruefen().is_err());

        let mut cfg = ServerConfig::default();
        cfg.logging.format = "xml".into();
        assert!(cfg.pruefen().is_err());

        let mut cfg = ServerConfig::default();
        cfg.logging.level = "debug".into();
        cfg.logging.format = "json".into();
        assert!(cfg.pruefen().is_ok());
    }

    #[test]
    fn ungueltiges_logging_in_datei_ist_ladefehler() {
        let pfad = std::env::temp_dir().join(format!(
            "treffpunkt-logging-{}.toml",
            std::process::id()
        ));
        std::fs::write(&pfad, "[logging]\nformat = \"yaml\"\n").unwrap();
        let ergebnis = ServerConfig::laden(pfad.to_str().unwrap());
        let _ = std::fs::remove_file(&pfad);
        assert!(ergebnis.is_err());
    }

    #[test]
    fn fehlende_datei_liefert_standardwerte() {
        let cfg = ServerConfig::laden("/gibt/es/nicht/treffpunkt.toml").unwrap();
        assert_eq!(cfg.server.max_clients, 1024);
    }
}
