//! MAVLink traffic inspector: per-message statistics and the component
//! inventory, both fed by the router on every inbound frame.

use crate::vehicle::{autopilot_name, is_peripheral_type, is_vehicle_type, mav_type_name};
use mavlink::common::MavMessage;
use mavlink::Message;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Sliding window the per-message rate is computed over.
const RATE_WINDOW_SECS: f64 = 2.0;
/// Timestamps retained per message key.
const RATE_HISTORY_DEPTH: usize = 100;
/// Payload dump is capped to this many top-level fields.
const PAYLOAD_FIELD_LIMIT: usize = 20;
/// A component is "active" while its last heartbeat is younger than this.
const COMPONENT_ACTIVE_SECS: f64 = 5.0;

#[derive(Debug, Clone, Serialize)]
pub struct MessageStat {
    pub msg_type: String,
    pub src_system: u8,
    pub src_component: u8,
    pub count: u64,
    pub rate: f64,
    /// Seconds since last seen; -1 before the first frame.
    pub age: f64,
    pub last_data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentEntry {
    pub src_system: u8,
    pub src_component: u8,
    pub mav_type: u8,
    pub type_name: String,
    pub category: &'static str,
    pub autopilot: &'static str,
    pub first_seen: f64,
    pub last_seen: f64,
    pub heartbeat_count: u64,
    pub is_target: bool,
    pub age: f64,
    pub active: bool,
}

struct StatSlot {
    count: u64,
    last_time: f64,
    rate: f64,
    last_data: Value,
    history: VecDeque<f64>,
}

struct ComponentSlot {
    mav_type: u8,
    autopilot_raw: u8,
    first_seen: f64,
    last_seen: f64,
    heartbeat_count: u64,
    is_target: bool,
}

#[derive(Default)]
pub struct Inspector {
    stats: Mutex<HashMap<(String, u8, u8), StatSlot>>,
    components: Mutex<HashMap<(u8, u8), ComponentSlot>>,
}

impl Inspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, src_system: u8, src_component: u8, msg: &MavMessage, now: f64) {
        self.record_named(
            msg.message_name().to_string(),
            src_system,
            src_component,
            payload_json(msg),
            now,
        );
    }

    /// Frames the codec could not decode still count; they surface as
    /// opaque rows with no payload.
    pub(crate) fn record_unknown(&self, msg_id: u32, now: f64) {
        self.record_named(format!("UNKNOWN_{msg_id}"), 0, 0, Value::Object(Default::default()), now);
    }

    fn record_named(
        &self,
        msg_type: String,
        src_system: u8,
        src_component: u8,
        last_data: Value,
        now: f64,
    ) {
        let mut stats = self.stats.lock().expect("stats lock");
        let slot = stats
            .entry((msg_type, src_system, src_component))
            .or_insert_with(|| StatSlot {
                count: 0,
                last_time: 0.0,
                rate: 0.0,
                last_data: Value::Object(Default::default()),
                history: VecDeque::with_capacity(RATE_HISTORY_DEPTH),
            });

        slot.count += 1;
        slot.last_time = now;
        slot.last_data = last_data;

        if slot.history.len() == RATE_HISTORY_DEPTH {
            slot.history.pop_front();
        }
        slot.history.push_back(now);
        let cutoff = now - RATE_WINDOW_SECS;
        while slot.history.front().is_some_and(|&t| t < cutoff) {
            slot.history.pop_front();
        }

        slot.rate = if slot.history.len() >= 2 {
            let span = slot.history.back().unwrap() - slot.history.front().unwrap();
            if span > 0.0 {
                let rate = (slot.history.len() - 1) as f64 / span;
                (rate * 10.0).round() / 10.0
            } else {
                0.0
            }
        } else {
            0.0
        };
    }

    pub fn stats(&self, now: f64) -> Vec<MessageStat> {
        let stats = self.stats.lock().expect("stats lock");
        let mut result: Vec<MessageStat> = stats
            .iter()
            .map(|((msg_type, src_system, src_component), slot)| MessageStat {
                msg_type: msg_type.clone(),
                src_system: *src_system,
                src_component: *src_component,
                count: slot.count,
                rate: slot.rate,
                age: if slot.last_time > 0.0 {
                    ((now - slot.last_time) * 10.0).round() / 10.0
                } else {
                    -1.0
                },
                last_data: slot.last_data.clone(),
            })
            .collect();
        result.sort_by(|a, b| a.msg_type.cmp(&b.msg_type));
        result
    }

    pub fn clear(&self) {
        self.stats.lock().expect("stats lock").clear();
    }

    pub(crate) fn register_component(
        &self,
        src_system: u8,
        src_component: u8,
        mav_type: u8,
        autopilot_raw: u8,
        now: f64,
    ) {
        let mut components = self.components.lock().expect("components lock");
        components
            .entry((src_system, src_component))
            .and_modify(|slot| {
                slot.last_seen = now;
                slot.heartbeat_count += 1;
            })
            .or_insert(ComponentSlot {
                mav_type,
                autopilot_raw,
                first_seen: now,
                last_seen: now,
                heartbeat_count: 1,
                is_target: false,
            });
    }

    pub(crate) fn mark_target(&self, src_system: u8, src_component: u8) {
        if let Some(slot) = self
            .components
            .lock()
            .expect("components lock")
            .get_mut(&(src_system, src_component))
        {
            slot.is_target = true;
        }
    }

    pub fn components(&self, now: f64) -> Vec<ComponentEntry> {
        let components = self.components.lock().expect("components lock");
        let mut result: Vec<ComponentEntry> = components
            .iter()
            .map(|(&(src_system, src_component), slot)| {
                let category = if is_vehicle_type(slot.mav_type) {
                    "vehicle"
                } else if is_peripheral_type(slot.mav_type) {
                    "peripheral"
                } else {
                    "unknown"
                };
                let age = ((now - slot.last_seen) * 10.0).round() / 10.0;
                ComponentEntry {
                    src_system,
                    src_component,
                    mav_type: slot.mav_type,
                    type_name: mav_type_name(slot.mav_type),
                    category,
                    autopilot: autopilot_name(slot.autopilot_raw),
                    first_seen: slot.first_seen,
                    last_seen: slot.last_seen,
                    heartbeat_count: slot.heartbeat_count,
                    is_target: slot.is_target,
                    age,
                    active: age < COMPONENT_ACTIVE_SECS,
                }
            })
            .collect();
        result.sort_by_key(|entry| {
            (
                !entry.is_target,
                entry.category != "vehicle",
                entry.src_system,
                entry.src_component,
            )
        });
        result
    }
}

/// Payload dump for the inspector. The enumerated message set is
/// serialized field-by-field through the codec's serde derives
/// (non-finite floats become null); everything else stays opaque.
fn payload_json(msg: &MavMessage) -> Value {
    let value = match msg {
        MavMessage::HEARTBEAT(data) => serde_json::to_value(data),
        MavMessage::ATTITUDE(data) => serde_json::to_value(data),
        MavMessage::GLOBAL_POSITION_INT(data) => serde_json::to_value(data),
        MavMessage::GPS_RAW_INT(data) => serde_json::to_value(data),
        MavMessage::VFR_HUD(data) => serde_json::to_value(data),
        MavMessage::SYS_STATUS(data) => serde_json::to_value(data),
        MavMessage::MISSION_CURRENT(data) => serde_json::to_value(data),
        MavMessage::MISSION_COUNT(data) => serde_json::to_value(data),
        MavMessage::MISSION_ITEM_INT(data) => serde_json::to_value(data),
        MavMessage::MISSION_REQUEST_INT(data) => serde_json::to_value(data),
        MavMessage::MISSION_REQUEST(data) => serde_json::to_value(data),
        MavMessage::MISSION_ACK(data) => serde_json::to_value(data),
        MavMessage::MISSION_CLEAR_ALL(data) => serde_json::to_value(data),
        MavMessage::MISSION_SET_CURRENT(data) => serde_json::to_value(data),
        MavMessage::MISSION_REQUEST_LIST(data) => serde_json::to_value(data),
        MavMessage::PARAM_VALUE(data) => serde_json::to_value(data),
        MavMessage::PARAM_SET(data) => serde_json::to_value(data),
        MavMessage::PARAM_REQUEST_LIST(data) => serde_json::to_value(data),
        MavMessage::STATUSTEXT(data) => serde_json::to_value(data),
        MavMessage::COMMAND_LONG(data) => serde_json::to_value(data),
        MavMessage::COMMAND_ACK(data) => serde_json::to_value(data),
        MavMessage::COMMAND_INT(data) => serde_json::to_value(data),
        MavMessage::REQUEST_DATA_STREAM(data) => serde_json::to_value(data),
        MavMessage::SET_POSITION_TARGET_GLOBAL_INT(data) => serde_json::to_value(data),
        MavMessage::RC_CHANNELS_OVERRIDE(data) => serde_json::to_value(data),
        MavMessage::MANUAL_CONTROL(data) => serde_json::to_value(data),
        MavMessage::CAMERA_INFORMATION(data) => serde_json::to_value(data),
        MavMessage::GIMBAL_DEVICE_INFORMATION(data) => serde_json::to_value(data),
        _ => Ok(Value::Object(Default::default())),
    };

    match value {
        Ok(Value::Object(map)) => {
            let mut trimmed = serde_json::Map::new();
            for (key, field) in map.into_iter().take(PAYLOAD_FIELD_LIMIT) {
                trimmed.insert(key, sanitize(field));
            }
            Value::Object(trimmed)
        }
        Ok(other) => sanitize(other),
        Err(_) => Value::Object(Default::default()),
    }
}

/// Non-finite numbers become null, recursively.
fn sanitize(value: Value) -> Value {
    match value {
        Value::Number(n) => {
            if n.as_f64().is_some_and(|f| !f.is_finite()) {
                Value::Null
            } else {
                Value::Number(n)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, sanitize(v))).collect())
        }
        other => other,
    }
}
