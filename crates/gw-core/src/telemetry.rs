//! Telemetry snapshot, JSON frame encoding and the broadcast emit gate.
//!
//! A vehicle's snapshot is mutated by the router under its lock; the
//! broadcaster reads whole clones and decides per vehicle, through
//! [`EmitGate`], whether this tick produces a full frame, a delta frame
//! or nothing.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};

/// Broadcast timer ceiling.
pub const BROADCAST_TICK: Duration = Duration::from_millis(100);
/// A full snapshot is forced at least this often per vehicle.
pub const FULL_SYNC_INTERVAL: Duration = Duration::from_secs(5);
/// Groundspeed above which an armed vehicle counts as moving.
pub const MOVING_SPEED_MPS: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    // Attitude, radians.
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub rollspeed: f32,
    pub pitchspeed: f32,
    pub yawspeed: f32,

    // Position, degrees / meters.
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub alt_msl: f64,

    // Speeds, m/s; heading in degrees.
    pub airspeed: f32,
    pub groundspeed: f32,
    pub climb: f32,
    pub heading: i32,

    // Battery.
    pub voltage: f32,
    pub current: f32,
    pub remaining: i8,

    // GPS.
    pub fix_type: u8,
    pub satellites: u8,
    pub hdop: f32,

    // Status.
    pub armed: bool,
    pub mode: String,
    pub system_status: u8,
    pub autopilot: String,
    pub mission_seq: i32,
    pub platform_type: String,
    /// Unix seconds of the last autopilot heartbeat; 0.0 before the first.
    pub last_heartbeat: f64,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            rollspeed: 0.0,
            pitchspeed: 0.0,
            yawspeed: 0.0,
            lat: 0.0,
            lon: 0.0,
            alt: 0.0,
            alt_msl: 0.0,
            airspeed: 0.0,
            groundspeed: 0.0,
            climb: 0.0,
            heading: 0,
            voltage: 0.0,
            current: 0.0,
            remaining: -1,
            fix_type: 0,
            satellites: 0,
            hdop: 99.99,
            armed: false,
            mode: String::new(),
            system_status: 0,
            autopilot: "unknown".to_string(),
            mission_seq: -1,
            platform_type: "Unknown".to_string(),
            last_heartbeat: 0.0,
        }
    }
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

fn num(value: f64) -> Value {
    json!(value)
}

impl TelemetrySnapshot {
    /// Rounded key/value frame as pushed to clients. Rounding doubles as
    /// delta noise suppression: a sub-resolution change produces an
    /// identical frame and is never emitted.
    pub fn to_frame(&self, now_unix: f64) -> Map<String, Value> {
        let heartbeat_age = if self.last_heartbeat > 0.0 {
            round_to(now_unix - self.last_heartbeat, 1)
        } else {
            -1.0
        };

        let mut frame = Map::new();
        frame.insert("roll".into(), num(round_to(self.roll as f64, 4)));
        frame.insert("pitch".into(), num(round_to(self.pitch as f64, 4)));
        frame.insert("yaw".into(), num(round_to(self.yaw as f64, 4)));
        frame.insert("rollspeed".into(), num(round_to(self.rollspeed as f64, 4)));
        frame.insert(
            "pitchspeed".into(),
            num(round_to(self.pitchspeed as f64, 4)),
        );
        frame.insert("yawspeed".into(), num(round_to(self.yawspeed as f64, 4)));
        frame.insert("lat".into(), num(self.lat));
        frame.insert("lon".into(), num(self.lon));
        frame.insert("alt".into(), num(round_to(self.alt, 2)));
        frame.insert("alt_msl".into(), num(round_to(self.alt_msl, 2)));
        frame.insert("airspeed".into(), num(round_to(self.airspeed as f64, 2)));
        frame.insert(
            "groundspeed".into(),
            num(round_to(self.groundspeed as f64, 2)),
        );
        frame.insert("climb".into(), num(round_to(self.climb as f64, 2)));
        frame.insert("heading".into(), json!(self.heading));
        frame.insert("voltage".into(), num(round_to(self.voltage as f64, 2)));
        frame.insert("current".into(), num(round_to(self.current as f64, 2)));
        frame.insert("remaining".into(), json!(self.remaining));
        frame.insert("fix_type".into(), json!(self.fix_type));
        frame.insert("satellites".into(), json!(self.satellites));
        frame.insert("hdop".into(), num(round_to(self.hdop as f64, 2)));
        frame.insert("armed".into(), json!(self.armed));
        frame.insert("mode".into(), json!(self.mode));
        frame.insert("system_status".into(), json!(self.system_status));
        frame.insert("autopilot".into(), json!(self.autopilot));
        frame.insert("mission_seq".into(), json!(self.mission_seq));
        frame.insert("platform_type".into(), json!(self.platform_type));
        frame.insert("heartbeat_age".into(), num(heartbeat_age));
        frame
    }
}

/// Fields of `next` that differ from `prev` (including fields absent
/// from `prev`).
pub fn delta_fields(prev: &Map<String, Value>, next: &Map<String, Value>) -> Map<String, Value> {
    let mut delta = Map::new();
    for (key, value) in next {
        if prev.get(key) != Some(value) {
            delta.insert(key.clone(), value.clone());
        }
    }
    delta
}

/// Inputs the gate needs for one vehicle on one tick.
#[derive(Debug, Clone)]
pub struct EmitInput {
    pub generation: u64,
    pub armed: bool,
    pub groundspeed: f64,
    pub mission_status: String,
    pub has_statustext: bool,
    pub frame: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmitDecision {
    Skip,
    Emit {
        fields: Map<String, Value>,
        full: bool,
    },
}

/// Per-vehicle broadcast pacing and change detection.
#[derive(Debug, Default)]
pub struct EmitGate {
    last_frame: Option<Map<String, Value>>,
    last_generation: u64,
    last_mission_status: Option<String>,
    last_full_sync: Option<Instant>,
    last_send: Option<Instant>,
}

impl EmitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum spacing between emissions for a vehicle in this state.
    pub fn min_interval(armed: bool, groundspeed: f64) -> Duration {
        if armed && groundspeed > MOVING_SPEED_MPS {
            Duration::from_millis(100)
        } else if armed {
            Duration::from_millis(200)
        } else {
            Duration::from_millis(1000)
        }
    }

    pub fn evaluate(&mut self, input: EmitInput, now: Instant) -> EmitDecision {
        if let Some(last_send) = self.last_send {
            let interval = Self::min_interval(input.armed, input.groundspeed);
            if now.duration_since(last_send) < interval {
                return EmitDecision::Skip;
            }
        }

        let full_due = match self.last_full_sync {
            Some(at) => now.duration_since(at) >= FULL_SYNC_INTERVAL,
            None => true,
        };
        let status_changed = self.last_mission_status.as_deref()
            != Some(input.mission_status.as_str());

        if input.generation == self.last_generation
            && !status_changed
            && !input.has_statustext
            && !full_due
        {
            return EmitDecision::Skip;
        }

        let force_full = full_due || self.last_frame.is_none();
        let fields = if force_full {
            input.frame.clone()
        } else {
            delta_fields(self.last_frame.as_ref().unwrap(), &input.frame)
        };

        if fields.is_empty() && !input.has_statustext && !status_changed {
            // Generation moved but every value rounded identical; swallow
            // the tick so idle vehicles stay quiet.
            self.last_generation = input.generation;
            return EmitDecision::Skip;
        }

        self.last_generation = input.generation;
        self.last_mission_status = Some(input.mission_status);
        self.last_frame = Some(input.frame);
        self.last_send = Some(now);
        if force_full {
            self.last_full_sync = Some(now);
        }

        EmitDecision::Emit {
            fields,
            full: force_full,
        }
    }
}
