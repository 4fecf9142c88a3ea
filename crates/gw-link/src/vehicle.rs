//! Per-vehicle runtime state.
//!
//! One `Vehicle` per `(link, src_system)`. Three independent locks:
//! telemetry snapshot, parameter table, and the feed (status-text ring
//! plus camera/gimbal tables). None is held across a queue or wire
//! call. The generation counter is read lock-free by the broadcaster.

use crate::command::{CommandKind, OutboundCommand};
use crate::config::LinkConfig;
use gw_core::params::{ParamTable, ParamValue};
use gw_core::profiles::{profile_for, VehicleProfile};
use gw_core::telemetry::TelemetrySnapshot;
use mavlink::common;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::trace;

pub(crate) fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// MAV_TYPE display names.
const MAV_TYPE_NAMES: &[(u8, &str)] = &[
    (0, "Generic"),
    (1, "Fixed Wing"),
    (2, "Quadrotor"),
    (3, "Coaxial"),
    (4, "Helicopter"),
    (5, "Antenna Tracker"),
    (6, "GCS"),
    (7, "Airship"),
    (8, "Free Balloon"),
    (9, "Rocket"),
    (10, "Ground Rover"),
    (11, "Surface Boat"),
    (12, "Submarine"),
    (13, "Hexarotor"),
    (14, "Octorotor"),
    (15, "Tricopter"),
    (16, "Flapping Wing"),
    (17, "Kite"),
    (18, "Companion Computer"),
    (19, "VTOL Tiltrotor"),
    (20, "VTOL Duo"),
    (21, "VTOL Quad"),
    (22, "VTOL Tailsitter"),
    (23, "VTOL Reserved"),
    (24, "VTOL Reserved"),
    (25, "VTOL Reserved"),
    (26, "Gimbal"),
    (27, "ADSB"),
    (28, "Parafoil"),
    (29, "Dodecarotor"),
    (30, "Camera"),
    (31, "Charging Station"),
    (32, "FLARM"),
    (33, "Servo"),
    (34, "ODID"),
    (35, "Decarotor"),
    (36, "Battery"),
    (37, "Parachute"),
    (38, "Log"),
    (39, "OSD"),
    (40, "IMU"),
    (41, "GPS"),
    (42, "Winch"),
];

/// MAV_TYPEs that get a Vehicle when their autopilot heartbeats.
const VEHICLE_TYPES: &[u8] = &[
    0, 1, 2, 3, 4, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 19, 20, 21, 22, 23, 24, 25, 28, 29,
    35,
];

/// Components tracked in the inventory but never promoted to vehicles.
const PERIPHERAL_TYPES: &[u8] = &[5, 6, 18, 26, 27, 30, 31, 32, 33, 34, 36, 37, 38, 39, 40, 41, 42];

pub(crate) fn mav_type_name(mav_type: u8) -> String {
    MAV_TYPE_NAMES
        .iter()
        .find(|&&(id, _)| id == mav_type)
        .map(|&(_, name)| name.to_string())
        .unwrap_or_else(|| format!("Type {mav_type}"))
}

pub(crate) fn is_vehicle_type(mav_type: u8) -> bool {
    VEHICLE_TYPES.contains(&mav_type)
}

pub(crate) fn is_peripheral_type(mav_type: u8) -> bool {
    PERIPHERAL_TYPES.contains(&mav_type)
}

pub(crate) fn autopilot_name(raw: u8) -> &'static str {
    match raw {
        3 => "ardupilot",
        12 => "px4",
        8 => "none",
        _ => "unknown",
    }
}

/// Map display colors handed out in a fixed cycle.
const VEHICLE_COLORS: &[&str] = &[
    "#06b6d4", "#f97316", "#8b5cf6", "#10b981", "#ec4899", "#eab308",
];

static COLOR_CURSOR: AtomicUsize = AtomicUsize::new(0);

fn next_vehicle_color() -> &'static str {
    let index = COLOR_CURSOR.fetch_add(1, Ordering::Relaxed);
    VEHICLE_COLORS[index % VEHICLE_COLORS.len()]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusTextEntry {
    pub severity: u8,
    pub text: String,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraInfo {
    pub component_id: u8,
    pub vendor: String,
    pub model: String,
    pub firmware_version: u32,
    pub focal_length: f32,
    pub sensor_size_h: f32,
    pub sensor_size_v: f32,
    pub resolution_h: u16,
    pub resolution_v: u16,
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GimbalInfo {
    pub component_id: u8,
    pub vendor: String,
    pub model: String,
    pub firmware_version: u32,
    pub cap_flags: u16,
    pub pitch_min: f32,
    pub pitch_max: f32,
    pub yaw_min: f32,
    pub yaw_max: f32,
}

/// Status-text ring plus camera/gimbal inventories; one lock for all
/// three, they change rarely and together.
#[derive(Default)]
struct VehicleFeed {
    statustext: Vec<StatusTextEntry>,
    cameras: HashMap<u8, CameraInfo>,
    gimbals: HashMap<u8, GimbalInfo>,
}

pub struct Vehicle {
    pub target_system: u8,
    pub target_component: u8,
    pub ardupilot: bool,
    pub mav_type: u8,
    pub color: &'static str,
    vehicle_id: Mutex<String>,
    display_name: Mutex<String>,

    telemetry: Mutex<TelemetrySnapshot>,
    generation: AtomicU64,
    params: Mutex<ParamTable>,
    feed: Mutex<VehicleFeed>,

    mission_inbox_tx: SyncSender<common::MavMessage>,
    mission_inbox_rx: Mutex<Receiver<common::MavMessage>>,
    command_tx: mpsc::Sender<OutboundCommand>,
    config: LinkConfig,
}

impl Vehicle {
    pub(crate) fn new(
        target_system: u8,
        target_component: u8,
        ardupilot: bool,
        mav_type: u8,
        command_tx: mpsc::Sender<OutboundCommand>,
        config: LinkConfig,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::sync_channel(config.mission_inbox_depth);

        let mut telemetry = TelemetrySnapshot::default();
        telemetry.autopilot = if ardupilot { "ardupilot" } else { "px4" }.to_string();
        telemetry.platform_type = mav_type_name(mav_type);

        Self {
            target_system,
            target_component,
            ardupilot,
            mav_type,
            color: next_vehicle_color(),
            vehicle_id: Mutex::new(target_system.to_string()),
            display_name: Mutex::new(format!("{} {}", mav_type_name(mav_type), target_system)),
            telemetry: Mutex::new(telemetry),
            generation: AtomicU64::new(0),
            params: Mutex::new(ParamTable::default()),
            feed: Mutex::new(VehicleFeed::default()),
            mission_inbox_tx: inbox_tx,
            mission_inbox_rx: Mutex::new(inbox_rx),
            command_tx,
            config,
        }
    }

    pub fn profile(&self) -> &'static VehicleProfile {
        profile_for(self.mav_type)
    }

    pub fn vehicle_id(&self) -> String {
        self.vehicle_id.lock().expect("vehicle id lock").clone()
    }

    pub(crate) fn set_vehicle_id(&self, id: String) {
        let name = format!("{} {}", mav_type_name(self.mav_type), id);
        *self.vehicle_id.lock().expect("vehicle id lock") = id;
        *self.display_name.lock().expect("display name lock") = name;
    }

    pub fn display_name(&self) -> String {
        self.display_name.lock().expect("display name lock").clone()
    }

    // --- Telemetry ---

    /// Apply one telemetry update atomically and bump the generation.
    pub(crate) fn update_telemetry(&self, apply: impl FnOnce(&mut TelemetrySnapshot)) {
        {
            let mut snapshot = self.telemetry.lock().expect("telemetry lock");
            apply(&mut snapshot);
        }
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.lock().expect("telemetry lock").clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    // --- Command submission ---

    pub(crate) fn enqueue(&self, kind: CommandKind) {
        let record = OutboundCommand {
            kind,
            target_system: self.target_system,
            target_component: self.target_component,
            ardupilot: self.ardupilot,
        };
        if self.command_tx.send(record).is_err() {
            trace!("command queue closed, dropping record");
        }
    }

    // --- Parameters ---

    pub(crate) fn update_param(&self, name: String, value: ParamValue, total: u16) {
        self.params
            .lock()
            .expect("params lock")
            .insert(name, value, total);
    }

    pub fn params_snapshot(&self) -> (HashMap<String, ParamValue>, u16) {
        let table = self.params.lock().expect("params lock");
        (table.params.clone(), table.total)
    }

    // --- Status text ---

    /// Append with the 1-second duplicate suppression window.
    pub(crate) fn push_statustext(&self, severity: u8, text: &str, now: f64) {
        let mut feed = self.feed.lock().expect("feed lock");
        for prev in feed.statustext.iter().rev() {
            if now - prev.time > self.config.statustext_dedupe_window.as_secs_f64() {
                break;
            }
            if prev.text == text && prev.severity == severity {
                return;
            }
        }
        feed.statustext.push(StatusTextEntry {
            severity,
            text: text.to_string(),
            time: now,
        });
        let depth = self.config.statustext_ring_depth;
        if feed.statustext.len() > depth {
            let excess = feed.statustext.len() - depth;
            feed.statustext.drain(..excess);
        }
    }

    /// Append without suppression (synthesized entries such as
    /// calibration progress).
    pub(crate) fn append_statustext(&self, severity: u8, text: String, now: f64) {
        let mut feed = self.feed.lock().expect("feed lock");
        feed.statustext.push(StatusTextEntry {
            severity,
            text,
            time: now,
        });
        let depth = self.config.statustext_ring_depth;
        if feed.statustext.len() > depth {
            let excess = feed.statustext.len() - depth;
            feed.statustext.drain(..excess);
        }
    }

    pub fn pending_statustext(&self) -> usize {
        self.feed.lock().expect("feed lock").statustext.len()
    }

    pub fn drain_statustext(&self) -> Vec<StatusTextEntry> {
        std::mem::take(&mut self.feed.lock().expect("feed lock").statustext)
    }

    // --- Cameras / gimbals ---

    pub(crate) fn update_camera(&self, info: CameraInfo) {
        self.feed
            .lock()
            .expect("feed lock")
            .cameras
            .insert(info.component_id, info);
    }

    pub(crate) fn update_gimbal(&self, info: GimbalInfo) {
        self.feed
            .lock()
            .expect("feed lock")
            .gimbals
            .insert(info.component_id, info);
    }

    pub fn cameras(&self) -> Vec<CameraInfo> {
        self.feed
            .lock()
            .expect("feed lock")
            .cameras
            .values()
            .cloned()
            .collect()
    }

    pub fn gimbals(&self) -> Vec<GimbalInfo> {
        self.feed
            .lock()
            .expect("feed lock")
            .gimbals
            .values()
            .cloned()
            .collect()
    }

    // --- Mission inbox ---

    /// Router side: deliver a mission-protocol frame. A full inbox drops
    /// the frame; the engine's retry semantics recover.
    pub(crate) fn deliver_mission_msg(&self, msg: common::MavMessage) {
        match self.mission_inbox_tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("mission inbox full, dropping frame"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Engine side: blocking read with deadline.
    pub(crate) fn recv_mission_msg(&self, timeout: Duration) -> Option<common::MavMessage> {
        self.mission_inbox_rx
            .lock()
            .expect("mission inbox lock")
            .recv_timeout(timeout)
            .ok()
    }

    pub(crate) fn drain_mission_inbox(&self) {
        let rx = self.mission_inbox_rx.lock().expect("mission inbox lock");
        while rx.try_recv().is_ok() {}
    }
}
