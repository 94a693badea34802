// src/signals/user_agent.rs
// Identifier (user-agent) checks: automation signatures and platform tokens.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFamily {
    Windows,
    Mac,
    Linux,
    Android,
    Ios,
}

impl PlatformFamily {
    /// Maps a client-declared platform string (e.g. `navigator.platform`).
    pub fn from_declared(platform: &str) -> Option<PlatformFamily> {
        let p = platform.trim().to_ascii_lowercase();
        if p.starts_with("win") {
            Some(PlatformFamily::Windows)
        } else if p.starts_with("mac") {
            Some(PlatformFamily::Mac)
        } else if p.contains("android") {
            Some(PlatformFamily::Android)
        } else if p.starts_with("iphone") || p.starts_with("ipad") || p.starts_with("ipod") || p == "ios" {
            Some(PlatformFamily::Ios)
        } else if p.starts_with("linux") || p.contains("x11") {
            Some(PlatformFamily::Linux)
        } else {
            None
        }
    }

    fn identifier_tokens(self) -> &'static [&'static str] {
        match self {
            PlatformFamily::Windows => &["windows", "win64", "win32", "wow64"],
            PlatformFamily::Mac => &["macintosh", "mac os x", "macos"],
            // Android reports navigator.platform as "Linux armv8l".
            PlatformFamily::Linux => &["linux", "x11", "ubuntu", "fedora", "cros", "android"],
            PlatformFamily::Android => &["android", "linux"],
            PlatformFamily::Ios => &["iphone", "ipad", "ipod", "ios", "macintosh"],
        }
    }
}

/// True when the declared platform maps to a known family whose tokens are
/// all missing from the identifier. Unknown platforms never mismatch.
pub fn platform_mismatch(identifier: &str, declared_platform: &str) -> bool {
    let Some(family) = PlatformFamily::from_declared(declared_platform) else {
        return false;
    };
    let lowered = identifier.to_ascii_lowercase();
    !family
        .identifier_tokens()
        .iter()
        .any(|token| lowered.contains(token))
}

/// First configured automation signature found in the identifier.
pub fn automation_signature<'a>(identifier: &str, signatures: &'a [String]) -> Option<&'a str> {
    let lowered = identifier.to_ascii_lowercase();
    signatures
        .iter()
        .map(String::as_str)
        .find(|signature| !signature.is_empty() && lowered.contains(signature))
}
