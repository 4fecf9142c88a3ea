use std::time::Duration;

/// Runtime tunables. The defaults carry the protocol constants; tests
/// shrink the timeouts.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub gcs_system_id: u8,
    pub gcs_component_id: u8,
    /// Window in which an autopilot heartbeat must arrive after open.
    pub handshake_timeout: Duration,
    /// GCS heartbeat period on every link.
    pub heartbeat_interval: Duration,
    /// Sleep between empty receive polls on the link worker.
    pub recv_idle_sleep: Duration,
    /// Overall wall deadline for a mission upload.
    pub mission_timeout: Duration,
    /// Overall wall deadline for fence uploads.
    pub fence_timeout: Duration,
    /// Per-read deadline on the mission inbox.
    pub request_timeout: Duration,
    /// Bounded depth of the per-vehicle mission inbox.
    pub mission_inbox_depth: usize,
    /// Status-text entries retained per vehicle.
    pub statustext_ring_depth: usize,
    /// Identical status-text suppression window.
    pub statustext_dedupe_window: Duration,
    /// Spacing between per-motor commands when testing all motors.
    pub motor_test_spacing: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            gcs_system_id: 255,
            gcs_component_id: 0,
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(1),
            recv_idle_sleep: Duration::from_millis(8),
            mission_timeout: Duration::from_secs(30),
            fence_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(5),
            mission_inbox_depth: 64,
            statustext_ring_depth: 100,
            statustext_dedupe_window: Duration::from_secs(1),
            motor_test_spacing: Duration::from_millis(50),
        }
    }
}
