//! RC-override channel validation.
//!
//! Override frames arrive from untrusted JSON (WebSocket) and from typed
//! API calls; both paths funnel through the same clamp so the wire only
//! ever carries eight values that are either 0 (channel released) or a
//! PWM inside [1000, 2000].

use serde::Serialize;
use serde_json::Value;

pub const RC_CHANNEL_COUNT: usize = 8;
pub const PWM_MIN: i64 = 1000;
pub const PWM_MAX: i64 = 2000;

/// Coerce one JSON element to an integer; anything non-numeric is 0.
fn coerce(value: &Value) -> i64 {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i
            } else if let Some(f) = n.as_f64() {
                f.trunc() as i64
            } else {
                0
            }
        }
        _ => 0,
    }
}

/// Validate a raw JSON channel list into exactly eight safe PWM values.
pub fn validate_rc_channels(raw: &[Value]) -> [u16; RC_CHANNEL_COUNT] {
    let coerced: Vec<i64> = raw
        .iter()
        .take(RC_CHANNEL_COUNT)
        .map(coerce)
        .collect();
    clamp_rc_channels(&coerced)
}

/// Validate an already-numeric channel list. 0 stays 0 ("release"),
/// everything else clamps into [1000, 2000]; short input pads with 0.
pub fn clamp_rc_channels(raw: &[i64]) -> [u16; RC_CHANNEL_COUNT] {
    let mut out = [0u16; RC_CHANNEL_COUNT];
    for (slot, &value) in out.iter_mut().zip(raw.iter().take(RC_CHANNEL_COUNT)) {
        *slot = if value == 0 {
            0
        } else {
            value.clamp(PWM_MIN, PWM_MAX) as u16
        };
    }
    out
}

/// PWM centered on 1500 mapped to the MANUAL_CONTROL [-1000, 1000] range.
pub fn pwm_to_signed(pwm: u16) -> i16 {
    ((pwm as f64 - 1500.0) / 500.0 * 1000.0).round() as i16
}

/// MANUAL_CONTROL axes derived from validated override channels, for
/// autopilots that do not accept RC_CHANNELS_OVERRIDE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManualControlSetpoint {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub r: i16,
}

pub fn manual_control_from_channels(channels: &[u16; RC_CHANNEL_COUNT]) -> ManualControlSetpoint {
    ManualControlSetpoint {
        y: pwm_to_signed(channels[0]),
        x: pwm_to_signed(channels[1]),
        z: (channels[2] as i32 - 1000).clamp(0, 1000) as i16,
        r: pwm_to_signed(channels[3]),
    }
}
