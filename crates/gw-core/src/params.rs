//! Parameter table types and the critical-parameter guard.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PARAM_ID_LEN: usize = 16;

/// MAV_PARAM_TYPE_REAL32, the default type for parameter writes.
pub const DEFAULT_PARAM_TYPE: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamValue {
    pub value: f32,
    #[serde(rename = "type")]
    pub param_type: u8,
    pub index: u16,
}

/// Per-vehicle parameter store fed by PARAM_VALUE messages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParamTable {
    pub params: HashMap<String, ParamValue>,
    /// Count announced by the vehicle, not the number received so far.
    pub total: u16,
}

impl ParamTable {
    pub fn insert(&mut self, name: String, value: ParamValue, total: u16) {
        self.params.insert(name, value);
        self.total = total;
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn received(&self) -> usize {
        self.params.len()
    }
}

/// Encode a parameter name as the 16-byte NUL-padded wire id.
pub fn encode_param_id(name: &str) -> [u8; PARAM_ID_LEN] {
    let mut id = [0u8; PARAM_ID_LEN];
    for (slot, byte) in id.iter_mut().zip(name.as_bytes()) {
        *slot = *byte;
    }
    id
}

/// Decode a wire parameter id, trimming trailing NULs.
pub fn decode_param_id(raw: &[u8; PARAM_ID_LEN]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(PARAM_ID_LEN);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Prefixes whose parameters can brick or endanger a vehicle when set
/// carelessly. Writes need an explicit confirmation.
const CRITICAL_PREFIXES: &[(&str, &str)] = &[
    ("BATT_", "battery"),
    ("FS_", "failsafe"),
    ("ARMING_", "arming"),
    ("MOT_", "motors"),
    ("INS_", "imu"),
];

pub fn critical_param_category(name: &str) -> Option<&'static str> {
    CRITICAL_PREFIXES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|&(_, category)| category)
}
