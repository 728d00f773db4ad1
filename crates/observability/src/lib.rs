//! # treffpunkt-observability
//!
//! Observability-Crate fuer Treffpunkt:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`)
//! - Structured Logging via tracing-subscriber (text oder JSON)
//! - Request-Timing Middleware

pub mod health;
pub mod logging;
pub mod metrics;
pub mod middleware;

pub use health::{health_router, HealthResponse, HealthState, HealthStatus};
pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, RelayKennzahlen, TreffpunktMetrics};
pub use middleware::request_timing_layer;

use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;

/// Router mit `/metrics` und `/health` inklusive Timing-Middleware
pub fn observability_router(metriken: TreffpunktMetrics, health: HealthState) -> Router {
    Router::new()
        .merge(metrics_router(metriken.clone()))
        .merge(health_router(health))
        .layer(axum::middleware::from_fn_with_state(
            metriken,
            middleware::timing_middleware,
        ))
        .layer(request_timing_layer())
}

/// Startet den Observability-HTTP-Server (Metriken + Health)
///
/// Endpunkte:
/// - `GET /metrics` – Prometheus scrape format
/// - `GET /health`  – Health-Check JSON
///
/// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt.
pub async fn observability_server_starten(
    bind_addr: SocketAddr,
    metriken: TreffpunktMetrics,
    health: HealthState,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let app = observability_router(metriken, health);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Observability-Server gestartet");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await?;

    tracing::info!("Observability-Server gestoppt");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn anfrage(addr: SocketAddr, pfad: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {pfad} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut antwort = String::new();
        stream.read_to_string(&mut antwort).await.unwrap();
        antwort
    }

    async fn server() -> (SocketAddr, TreffpunktMetrics) {
        let metriken = TreffpunktMetrics::neu().unwrap();
        let health = HealthState::neu(metriken.clone(), 100);
        let app = observability_router(metriken.clone(), health);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (addr, metriken)
    }

    #[tokio::test]
    async fn health_endpunkt_liefert_json() {
        let (addr, metriken) = server().await;
        metriken.connected_clients.set(7);

        let antwort = anfrage(addr, "/health").await;
        assert!(antwort.starts_with("HTTP/1.1 200"));
        assert!(antwort.contains("\"status\":\"healthy\""));
        assert!(antwort.contains("\"connected_clients\":7"));
    }

    #[tokio::test]
    async fn metrics_endpunkt_zaehlt_anfragen() {
        let (addr, _metriken) = server().await;
        anfrage(addr, "/health").await;

        let antwort = anfrage(addr, "/metrics").await;
        assert!(antwort.starts_with("HTTP/1.1 200"));
        assert!(antwort.contains("treffpunkt_sessions_active"));
        assert!(antwort.contains(
            "treffpunkt_http_requests_total{method=\"GET\",path=\"/health\",status=\"200\"} 1"
        ));
    }

    #[tokio::test]
    async fn unbekannter_pfad_ist_404() {
        let (addr, _metriken) = server().await;
        let antwort = anfrage(addr, "/gibt-es-nicht").await;
        assert!(antwort.starts_with("HTTP/1.1 404"));
    }
}
