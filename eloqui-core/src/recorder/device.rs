//! Capture device selection.
//!
//! The recorder wants system-output audio when it can get it (what a
//! display capture would carry), so loopback/monitor-style devices rank
//! first; a plain microphone is the attach-fallback.

use serde::{Deserialize, Serialize};

/// Metadata about an audio capture device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
    /// Heuristic flag for devices that capture system/output audio.
    pub is_loopback_like: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "virtual output",
    "monitor of",
    "mixage stereo",
    "mezcla estereo",
    "mix stereo",
];

/// Best-effort heuristic for loopback/system-output capture devices.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// List all capture devices, loopback-like devices first.
#[cfg(feature = "audio-cpal")]
pub fn list_capture_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Capture Device {}", idx + 1));
                    DeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        is_loopback_like: is_loopback_like_name(&name),
                        name,
                    }
                })
                .collect::<Vec<_>>();
            list.sort_by_key(|d| (!d.is_loopback_like, !d.is_default, d.name.clone()));
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate capture devices: {e}");
            vec![]
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_capture_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::is_loopback_like_name;

    #[test]
    fn detects_common_loopback_names() {
        assert!(is_loopback_like_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_like_name("Monitor of Built-in Audio"));
        assert!(is_loopback_like_name("What U Hear (Sound Blaster)"));
    }

    #[test]
    fn plain_microphones_are_not_loopback() {
        assert!(!is_loopback_like_name("Microphone Array (USB PnP Audio Device)"));
        assert!(!is_loopback_like_name("Headset Mic"));
    }
}
