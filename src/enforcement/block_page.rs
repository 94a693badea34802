// src/enforcement/block_page.rs
// Fixed payload handed to the caller when a device is blocked.

use serde::Serialize;

use super::decision::Decision;

/// HTTP status the caller should use for a Block outcome.
pub const BLOCK_STATUS: u16 = 403;

const BLOCK_ERROR: &str = "Device Security Check Failed";
const BLOCK_CODE: &str = "DEVICE_BLOCKED";
const BLOCK_MESSAGE: &str =
    "This device did not pass our security checks and cannot access this service right now.";
const SUPPORT_HINT: &str =
    "If you believe this is an error, contact support and quote the reference below.";

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockPayload {
    pub error: &'static str,
    pub code: &'static str,
    pub message: &'static str,
    pub support_hint: String,
}

impl BlockPayload {
    pub fn for_decision(decision: &Decision) -> Self {
        BlockPayload {
            error: BLOCK_ERROR,
            code: BLOCK_CODE,
            message: BLOCK_MESSAGE,
            support_hint: format!("{} Reference: {}", SUPPORT_HINT, decision.fingerprint),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\":\"{}\",\"code\":\"{}\"}}",
                BLOCK_ERROR, BLOCK_CODE
            )
        })
    }
}
