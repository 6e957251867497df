//! Metrics collection.
//!
//! Prometheus-compatible metrics for armed windows, enforcement, and
//! recovery. All label values come from closed internal sets (modes,
//! error categories), so no cardinality protection is needed.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::VoiceGuardError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `VoiceGuardError::Io` if the recorder or HTTP listener cannot
/// be installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), VoiceGuardError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| VoiceGuardError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "voiceguard_activations_total",
        "Protections fired, by rule mode"
    );
    describe_counter!(
        "voiceguard_windows_armed_total",
        "Instant windows armed or re-armed"
    );
    describe_counter!(
        "voiceguard_windows_expired_total",
        "Instant windows that expired unconsumed"
    );
    describe_gauge!(
        "voiceguard_monitors_active",
        "Persistent monitors currently running"
    );
    describe_counter!(
        "voiceguard_cooldown_escalations_total",
        "Cooldown escalations recorded"
    );
    describe_counter!(
        "voiceguard_permission_denials_total",
        "Enforcement attempts skipped for missing removal permission"
    );
    describe_counter!(
        "voiceguard_platform_failures_total",
        "Adapter lookup or removal failures, by operation"
    );
    describe_counter!(
        "voiceguard_interference_total",
        "External interference events (agent removed mid-protection)"
    );
    describe_counter!(
        "voiceguard_recovered_protections_total",
        "Protections re-armed by the recovery coordinator"
    );
}

/// Records a fired protection.
pub fn record_activation(mode: &str) {
    counter!("voiceguard_activations_total", "mode" => mode.to_owned()).increment(1);
}

/// Records an armed (or re-armed) instant window.
pub fn record_window_armed() {
    counter!("voiceguard_windows_armed_total").increment(1);
}

/// Records an instant window expiring unconsumed.
pub fn record_window_expired() {
    counter!("voiceguard_windows_expired_total").increment(1);
}

/// Sets the number of running persistent monitors.
#[allow(clippy::cast_precision_loss)]
pub fn set_monitors_active(count: u64) {
    gauge!("voiceguard_monitors_active").set(count as f64);
}

/// Records a cooldown escalation.
pub fn record_cooldown_escalation() {
    counter!("voiceguard_cooldown_escalations_total").increment(1);
}

/// Records an enforcement skipped for missing permission.
pub fn record_permission_denied() {
    counter!("voiceguard_permission_denials_total").increment(1);
}

/// Records an adapter failure during the named operation.
pub fn record_platform_failure(operation: &'static str) {
    counter!("voiceguard_platform_failures_total", "operation" => operation).increment(1);
}

/// Records an external interference event.
pub fn record_interference() {
    counter!("voiceguard_interference_total").increment(1);
}

/// Records protections re-armed during a recovery pass.
pub fn record_recovered(count: u64) {
    counter!("voiceguard_recovered_protections_total").increment(count);
}
