// src/signals/observation.rs
// Request observation and the client-declared attribute record.
// Every client-declared field is optional and untrusted; malformed values are
// dropped to `None` instead of failing the request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAX_ATTRIBUTE_PAYLOAD_BYTES: usize = 32 * 1024;
pub const MAX_ATTRIBUTE_STRING_LEN: usize = 512;
pub const MAX_ATTRIBUTE_LIST_LEN: usize = 256;
pub const MAX_IDENTIFIER_LEN: usize = 1024;
const MAX_SCREEN_DIMENSION: u64 = 32_768;
const MAX_COLOR_DEPTH: u64 = 64;
const MAX_DECLARED_CPUS: u64 = 4_096;
const MAX_DECLARED_MEMORY_GB: f64 = 4_096.0;

/// Number of optional attribute slots that feed `confidence`.
pub const ATTRIBUTE_SLOTS: usize = 14;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub color_depth: Option<u32>,
}

/// Client-declared attributes in canonical order. Field order here is the
/// order used for fingerprint derivation.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ClientAttributes {
    pub timezone: Option<String>,
    pub screen: Option<ScreenGeometry>,
    pub platform: Option<String>,
    pub plugins: Option<Vec<String>>,
    pub fonts: Option<Vec<String>>,
    pub canvas_signature: Option<String>,
    pub webgl_signature: Option<String>,
    pub audio_signature: Option<String>,
    pub touch_support: Option<bool>,
    pub hardware_concurrency: Option<u32>,
    pub device_memory: Option<f64>,
    pub connection_type: Option<String>,
    pub cookies_enabled: Option<bool>,
    pub do_not_track: Option<bool>,
}

impl ClientAttributes {
    /// Parses the out-of-band client payload field by field. A field with the
    /// wrong shape is treated as absent; an unparsable document yields an
    /// all-absent record.
    pub fn from_json_lenient(bytes: &[u8]) -> ClientAttributes {
        if bytes.len() > MAX_ATTRIBUTE_PAYLOAD_BYTES {
            return ClientAttributes::default();
        }
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => {
                let field = |names: &[&str]| names.iter().find_map(|name| map.get(*name));
                ClientAttributes {
                    timezone: field(&["timezone", "timeZone"]).and_then(lenient_string),
                    screen: field(&["screen"]).and_then(lenient_screen),
                    platform: field(&["platform"]).and_then(lenient_string),
                    plugins: field(&["plugins"]).and_then(lenient_list),
                    fonts: field(&["fonts"]).and_then(lenient_list),
                    canvas_signature: field(&["canvas", "canvasSignature"])
                        .and_then(lenient_string),
                    webgl_signature: field(&["webgl", "webglSignature"]).and_then(lenient_string),
                    audio_signature: field(&["audio", "audioSignature"]).and_then(lenient_string),
                    touch_support: field(&["touchSupport", "touch"]).and_then(lenient_bool),
                    hardware_concurrency: field(&["hardwareConcurrency"])
                        .and_then(|v| lenient_u64(v, MAX_DECLARED_CPUS))
                        .and_then(|v| u32::try_from(v).ok()),
                    device_memory: field(&["deviceMemory"]).and_then(lenient_memory),
                    connection_type: field(&["connection", "connectionType"])
                        .and_then(lenient_string),
                    cookies_enabled: field(&["cookiesEnabled", "cookieEnabled"])
                        .and_then(lenient_bool),
                    do_not_track: field(&["doNotTrack"]).and_then(lenient_bool),
                }
            }
            _ => ClientAttributes::default(),
        }
    }

    pub fn populated_fields(&self) -> usize {
        [
            self.timezone.is_some(),
            self.screen.is_some(),
            self.platform.is_some(),
            self.plugins.is_some(),
            self.fonts.is_some(),
            self.canvas_signature.is_some(),
            self.webgl_signature.is_some(),
            self.audio_signature.is_some(),
            self.touch_support.is_some(),
            self.hardware_concurrency.is_some(),
            self.device_memory.is_some(),
            self.connection_type.is_some(),
            self.cookies_enabled.is_some(),
            self.do_not_track.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    /// Fraction of the optional surface the client populated.
    pub fn confidence(&self) -> f64 {
        self.populated_fields() as f64 / ATTRIBUTE_SLOTS as f64
    }
}

/// One inbound request as seen by the gate.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RequestObservation {
    /// Network origin, normally the client IP address.
    pub origin: String,
    /// Raw client-identifying string (user agent); untrusted.
    pub identifier: Option<String>,
    #[serde(default)]
    pub attributes: ClientAttributes,
    /// Endpoint being accessed, carried into alerts only.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Authenticated principal, when the caller already knows it.
    #[serde(default)]
    pub principal_id: Option<String>,
}

impl RequestObservation {
    pub fn new(origin: impl Into<String>, identifier: Option<&str>) -> Self {
        RequestObservation {
            origin: origin.into().trim().to_string(),
            identifier: identifier.map(cap_identifier),
            ..Default::default()
        }
    }

    pub fn with_attributes(mut self, attributes: ClientAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    /// Identifier with surrounding whitespace removed; empty counts as absent.
    pub fn identifier_str(&self) -> Option<&str> {
        self.identifier
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

fn cap_identifier(raw: &str) -> String {
    truncate_chars(raw, MAX_IDENTIFIER_LEN)
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

fn lenient_string(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    if s.is_empty() || s.chars().any(|c| c.is_control()) {
        return None;
    }
    Some(truncate_chars(s, MAX_ATTRIBUTE_STRING_LEN))
}

fn lenient_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(lenient_string)
                .take(MAX_ATTRIBUTE_LIST_LEN)
                .collect(),
        ),
        Value::String(joined) => Some(
            joined
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .take(MAX_ATTRIBUTE_LIST_LEN)
                .map(|s| truncate_chars(s, MAX_ATTRIBUTE_STRING_LEN))
                .collect(),
        ),
        _ => None,
    }
}

fn lenient_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_u64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn lenient_u64(value: &Value, max: u64) -> Option<u64> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    (parsed <= max).then_some(parsed)
}

fn lenient_memory(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (parsed.is_finite() && parsed > 0.0 && parsed <= MAX_DECLARED_MEMORY_GB).then_some(parsed)
}

fn lenient_screen(value: &Value) -> Option<ScreenGeometry> {
    let dimension = |v: Option<&Value>, max: u64| {
        v.and_then(|v| lenient_u64(v, max))
            .and_then(|v| u32::try_from(v).ok())
    };
    match value {
        Value::Object(map) => {
            let width = dimension(map.get("width"), MAX_SCREEN_DIMENSION)?;
            let height = dimension(map.get("height"), MAX_SCREEN_DIMENSION)?;
            let color_depth = dimension(
                map.get("colorDepth").or_else(|| map.get("color_depth")),
                MAX_COLOR_DEPTH,
            );
            Some(ScreenGeometry {
                width,
                height,
                color_depth,
            })
        }
        Value::String(s) => {
            let mut parts = s.trim().split('x');
            let width = parts.next()?.trim().parse::<u32>().ok()?;
            let height = parts.next()?.trim().parse::<u32>().ok()?;
            let color_depth = parts.next().and_then(|d| d.trim().parse::<u32>().ok());
            if u64::from(width) > MAX_SCREEN_DIMENSION || u64::from(height) > MAX_SCREEN_DIMENSION {
                return None;
            }
            Some(ScreenGeometry {
                width,
                height,
                color_depth: color_depth.filter(|d| u64::from(*d) <= MAX_COLOR_DEPTH),
            })
        }
        _ => None,
    }
}
