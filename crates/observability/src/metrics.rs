//! Prometheus-kompatible Metriken fuer Treffpunkt
//!
//! Registrierte Metriken:
//! - `treffpunkt_connected_clients` – Gauge: Aktuell registrierte Clients
//! - `treffpunkt_sessions_active` – Gauge: Offene Aushandlungs-Sessions
//! - `treffpunkt_envelopes_forwarded_total` – Counter: Weitergeleitete Envelopes
//! - `treffpunkt_envelopes_rejected_total` – Counter: Abgelehnte Nachrichten (reason)
//! - `treffpunkt_outbound_overflow_total` – Counter: Ueberlaeufe von Ausgangs-Queues
//! - `treffpunkt_http_requests_total` – Counter: HTTP-Anfragen (method, path, status)
//! - `treffpunkt_http_request_duration_seconds` – Histogram: HTTP-Antwortzeit
//!
//! Die Relay-Zaehler leben als Atomics im Signaling-Crate. Ein Collector
//! uebertraegt sie periodisch per `aktualisieren`.

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Momentaufnahme der Relay-Zaehler fuer `aktualisieren`
#[derive(Debug, Clone, Default)]
pub struct RelayKennzahlen {
    pub verbundene_clients: usize,
    pub aktive_sessions: usize,
    pub weitergeleitet: u64,
    /// Kumulierte Ablehnungen pro Wire-Grund (`bad-json`, ...)
    pub abgelehnt: Vec<(&'static str, u64)>,
    pub ueberlaeufe: u64,
}

/// Alle Treffpunkt-Prometheus-Metriken
#[derive(Clone)]
pub struct TreffpunktMetrics {
    pub registry: Arc<Registry>,

    // Relay-Metriken
    pub connected_clients: IntGauge,
    pub sessions_active: IntGauge,
    pub envelopes_forwarded_total: IntCounter,
    pub envelopes_rejected_total: IntCounterVec,
    pub outbound_overflow_total: IntCounter,

    // HTTP-Metriken
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
}

impl TreffpunktMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Relay-Metriken ---
        let connected_clients = IntGauge::with_opts(Opts::new(
            "treffpunkt_connected_clients",
            "Anzahl aktuell registrierter Clients",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let sessions_active = IntGauge::with_opts(Opts::new(
            "treffpunkt_sessions_active",
            "Anzahl offener Aushandlungs-Sessions",
        ))?;
        registry.register(Box::new(sessions_active.clone()))?;

        let envelopes_forwarded_total = IntCounter::with_opts(Opts::new(
            "treffpunkt_envelopes_forwarded_total",
            "Gesamtanzahl weitergeleiteter Envelopes",
        ))?;
        registry.register(Box::new(envelopes_forwarded_total.clone()))?;

        let envelopes_rejected_total = IntCounterVec::new(
            Opts::new(
                "treffpunkt_envelopes_rejected_total",
                "Gesamtanzahl abgelehnter Client-Nachrichten",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(envelopes_rejected_total.clone()))?;

        let outbound_overflow_total = IntCounter::with_opts(Opts::new(
            "treffpunkt_outbound_overflow_total",
            "Gesamtanzahl uebergelaufener Ausgangs-Queues",
        ))?;
        registry.register(Box::new(outbound_overflow_total.clone()))?;

        // --- HTTP-Metriken ---
        let http_requests_total = IntCounterVec::new(
            Opts::new("treffpunkt_http_requests_total", "Gesamtanzahl HTTP-Anfragen"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "treffpunkt_http_request_duration_seconds",
                "HTTP-Antwortzeit in Sekunden",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["method", "path"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            sessions_active,
            envelopes_forwarded_total,
            envelopes_rejected_total,
            outbound_overflow_total,
            http_requests_total,
            http_request_duration_seconds,
        })
    }

    /// Uebernimmt eine Momentaufnahme der Relay-Zaehler
    ///
    /// Counter koennen nur wachsen: uebertragen wird die Differenz zum
    /// bisherigen Stand.
    pub fn aktualisieren(&self, kennzahlen: &RelayKennzahlen) {
        self.connected_clients
            .set(i64::try_from(kennzahlen.verbundene_clients).unwrap_or(i64::MAX));
        self.sessions_active
            .set(i64::try_from(kennzahlen.aktive_sessions).unwrap_or(i64::MAX));

        counter_nachziehen(&self.envelopes_forwarded_total, kennzahlen.weitergeleitet);
        counter_nachziehen(&self.outbound_overflow_total, kennzahlen.ueberlaeufe);
        for (grund, wert) in &kennzahlen.abgelehnt {
            counter_nachziehen(
                &self.envelopes_rejected_total.with_label_values(&[*grund]),
                *wert,
            );
        }
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn counter_nachziehen(counter: &IntCounter, stand: u64) {
    let delta = stand.saturating_sub(counter.get());
    if delta > 0 {
        counter.inc_by(delta);
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: TreffpunktMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<TreffpunktMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kennzahlen(weitergeleitet: u64, bad_json: u64) -> RelayKennzahlen {
        RelayKennzahlen {
            verbundene_clients: 3,
            aktive_sessions: 1,
            weitergeleitet,
            abgelehnt: vec![("bad-json", bad_json), ("unknown-target", 0)],
            ueberlaeufe: 0,
        }
    }

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = TreffpunktMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn aktualisieren_setzt_gauges() {
        let metriken = TreffpunktMetrics::neu().unwrap();
        metriken.aktualisieren(&kennzahlen(0, 0));
        assert_eq!(metriken.connected_clients.get(), 3);
        assert_eq!(metriken.sessions_active.get(), 1);
    }

    #[test]
    fn counter_folgen_dem_kumulierten_stand() {
        let metriken = TreffpunktMetrics::neu().unwrap();
        metriken.aktualisieren(&kennzahlen(5, 1));
        metriken.aktualisieren(&kennzahlen(12, 1));
        assert_eq!(metriken.envelopes_forwarded_total.get(), 12);
        assert_eq!(
            metriken
                .envelopes_rejected_total
                .with_label_values(&["bad-json"])
                .get(),
            1
        );

        // Ein kleinerer Stand laesst den Counter unveraendert
        metriken.aktualisieren(&kennzahlen(4, 0));
        assert_eq!(metriken.envelopes_forwarded_total.get(), 12);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = TreffpunktMetrics::neu().unwrap();
        metriken.aktualisieren(&kennzahlen(2, 1));

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("treffpunkt_connected_clients 3"));
        assert!(output.contains("treffpunkt_envelopes_forwarded_total 2"));
        assert!(output.contains("treffpunkt_envelopes_rejected_total{reason=\"bad-json\"} 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn alle_metriken_in_registry_registriert() {
        let metriken = TreffpunktMetrics::neu().unwrap();

        // Vec-Metriken erscheinen in gather() erst nach dem ersten Label-Zugriff
        metriken
            .envelopes_rejected_total
            .with_label_values(&["bad-json"])
            .inc();
        metriken
            .http_requests_total
            .with_label_values(&["GET", "/metrics", "200"])
            .inc();
        metriken
            .http_request_duration_seconds
            .with_label_values(&["GET", "/metrics"])
            .observe(0.01);

        let families = metriken.registry.gather();
        let namen: Vec<&str> = families.iter().map(|f| f.get_name()).collect();

        for name in [
            "treffpunkt_connected_clients",
            "treffpunkt_sessions_active",
            "treffpunkt_envelopes_forwarded_total",
            "treffpunkt_envelopes_rejected_total",
            "treffpunkt_outbound_overflow_total",
            "treffpunkt_http_requests_total",
            "treffpunkt_http_request_duration_seconds",
        ] {
            assert!(namen.contains(&name), "{name} fehlt");
        }
    }
}
