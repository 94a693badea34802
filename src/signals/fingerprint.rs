// src/signals/fingerprint.rs
// Deterministic device fingerprint derived from request-observable attributes.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::observation::{ClientAttributes, RequestObservation, ScreenGeometry};

pub const FINGERPRINT_HEX_LEN: usize = 32;

const ABSENT: &str = "\u{0}absent";
const FIELD_SEPARATOR: char = '\u{1f}';
const LIST_SEPARATOR: char = '\u{1e}';

/// Fixed-length lowercase hex token identifying a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Validates an externally supplied token (admin lookups).
    pub fn parse(value: &str) -> Option<Fingerprint> {
        let trimmed = value.trim();
        if trimmed.len() != FINGERPRINT_HEX_LEN {
            return None;
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return None;
        }
        Some(Fingerprint(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// All-zero token reported when derivation itself faulted.
    pub fn unidentified() -> Fingerprint {
        Fingerprint("0".repeat(FINGERPRINT_HEX_LEN))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn derive(observation: &RequestObservation) -> Fingerprint {
    let digest = Sha256::digest(canonical_bytes(observation).as_bytes());
    Fingerprint(hex_prefix(&digest, FINGERPRINT_HEX_LEN))
}

/// Fingerprint plus the fraction of optional attributes that were present.
/// Confidence never participates in the hash.
pub fn derive_with_confidence(observation: &RequestObservation) -> (Fingerprint, f64) {
    (derive(observation), observation.attributes.confidence())
}

/// Canonical encoding: every slot is emitted in a fixed order, absent slots
/// as a sentinel, so field positions never shift. Values are length-prefixed
/// so separator bytes inside untrusted strings cannot forge a boundary.
fn canonical_bytes(observation: &RequestObservation) -> String {
    let attrs: &ClientAttributes = &observation.attributes;
    let slots: [(&str, Option<String>); 16] = [
        ("origin", Some(observation.origin.clone())),
        ("identifier", observation.identifier.clone()),
        ("timezone", attrs.timezone.clone()),
        ("screen", attrs.screen.map(encode_screen)),
        ("platform", attrs.platform.clone()),
        ("plugins", attrs.plugins.as_deref().map(encode_list)),
        ("fonts", attrs.fonts.as_deref().map(encode_list)),
        ("canvas", attrs.canvas_signature.clone()),
        ("webgl", attrs.webgl_signature.clone()),
        ("audio", attrs.audio_signature.clone()),
        ("touch", attrs.touch_support.map(|v| v.to_string())),
        ("cpus", attrs.hardware_concurrency.map(|v| v.to_string())),
        ("memory", attrs.device_memory.map(|v| v.to_string())),
        ("connection", attrs.connection_type.clone()),
        ("cookies", attrs.cookies_enabled.map(|v| v.to_string())),
        ("dnt", attrs.do_not_track.map(|v| v.to_string())),
    ];

    let mut out = String::with_capacity(256);
    for (i, (name, value)) in slots.iter().enumerate() {
        if i > 0 {
            out.push(FIELD_SEPARATOR);
        }
        out.push_str(name);
        out.push('=');
        match value {
            Some(value) => push_length_prefixed(&mut out, value),
            None => out.push_str(ABSENT),
        }
    }
    out
}

fn encode_screen(screen: ScreenGeometry) -> String {
    match screen.color_depth {
        Some(depth) => format!("{}x{}x{}", screen.width, screen.height, depth),
        None => format!("{}x{}x-", screen.width, screen.height),
    }
}

fn encode_list(items: &[String]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(LIST_SEPARATOR);
        }
        push_length_prefixed(&mut out, item);
    }
    out
}

fn push_length_prefixed(out: &mut String, value: &str) {
    out.push_str(&value.len().to_string());
    out.push(':');
    out.push_str(value);
}

fn hex_prefix(bytes: &[u8], hex_len: usize) -> String {
    let mut out = String::with_capacity(hex_len);
    for byte in bytes {
        if out.len() >= hex_len {
            break;
        }
        out.push(hex_nibble(byte >> 4));
        if out.len() >= hex_len {
            break;
        }
        out.push(hex_nibble(byte & 0x0f));
    }
    out
}

fn hex_nibble(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'a' + (nibble - 10)) as char,
    }
}
