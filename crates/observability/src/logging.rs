//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `TP_LOG_LEVEL`: Log-Level oder Filter-Direktive, Standard aus der Config
//! - `TP_LOG_FORMAT`: Format (text/json), Standard aus der Config
//!
//! Die Umgebung hat Vorrang vor der Konfigurationsdatei.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialisiert das Logging-System.
///
/// `level` und `format` kommen aus der Konfiguration und werden von
/// `TP_LOG_LEVEL` / `TP_LOG_FORMAT` ueberschrieben. Faellt auf `info` /
/// `text` zurueck, wenn nichts Gueltiges gesetzt ist.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env("TP_LOG_LEVEL")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = log_format_aus_env().unwrap_or_else(|| format.to_string());

    match format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Log-Format aus `TP_LOG_FORMAT`, falls gesetzt und gueltig
pub fn log_format_aus_env() -> Option<String> {
    std::env::var("TP_LOG_FORMAT")
        .ok()
        .filter(|f| log_format_gueltig(f))
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
