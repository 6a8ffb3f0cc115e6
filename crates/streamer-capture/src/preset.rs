//! Hardware detection and startup preset selection.

use std::fs;
use std::thread;
use std::time::Duration;

use sysinfo::System;
use tracing::{debug, info, warn};

use streamer_ipc::VideoPreset;

use crate::{FPS_STEP, LOAD_THRESHOLD_PERCENT, MIN_FPS};

const DEVICE_MODEL_PATH: &str = "/proc/device-tree/model";

/// Board family, as far as preset selection cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareProfile {
    /// Raspberry Pi 5.
    Pi5,
    /// Raspberry Pi 4.
    Pi4,
    /// Anything else.
    Unknown,
}

impl HardwareProfile {
    /// Read the board model from the device tree.
    pub fn detect() -> Self {
        match fs::read_to_string(DEVICE_MODEL_PATH) {
            Ok(model) => {
                let profile = Self::from_model(&model);
                info!(model = model.trim_end_matches('\0').trim(), ?profile, "Detected hardware");
                profile
            }
            Err(e) => {
                debug!("No device model available: {}", e);
                Self::Unknown
            }
        }
    }

    /// Classify a device-tree model string.
    pub fn from_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.contains("raspberry pi 5") {
            Self::Pi5
        } else if model.contains("raspberry pi 4") {
            Self::Pi4
        } else {
            Self::Unknown
        }
    }

    /// Frame rate and rate control for this board before any load downgrade.
    pub fn base_preset(&self, fallback_fps: u32, width: u32, height: u32) -> VideoPreset {
        let (fps, bitrate_kbps, maxrate_kbps, bufsize_kbps) = match self {
            Self::Pi5 => (30, 2500, 3000, 4000),
            Self::Pi4 => (20, 1500, 1800, 2400),
            Self::Unknown => (fallback_fps, 1500, 1800, 2400),
        };

        VideoPreset {
            width,
            height,
            fps,
            bitrate_kbps,
            maxrate_kbps,
            bufsize_kbps,
        }
    }
}

/// Samples system load once at startup.
pub trait LoadProbe {
    /// CPU load in percent, or None if it cannot be measured.
    fn cpu_load_percent(&mut self) -> Option<f32>;
}

/// CPU load measured over a short window with `sysinfo`.
pub struct SystemLoadProbe {
    window: Duration,
}

impl SystemLoadProbe {
    /// Sample over `window`, never shorter than the minimum refresh interval.
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

impl Default for SystemLoadProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl LoadProbe for SystemLoadProbe {
    fn cpu_load_percent(&mut self) -> Option<f32> {
        let mut system = System::new();
        system.refresh_cpu();
        thread::sleep(self.window);
        system.refresh_cpu();

        let load = system.global_cpu_info().cpu_usage();
        load.is_finite().then_some(load)
    }
}

/// Pick the session's video preset.
///
/// A loaded system loses [`FPS_STEP`] frames per second, but never drops
/// below [`MIN_FPS`].
pub fn select_preset(
    profile: HardwareProfile,
    fallback_fps: u32,
    width: u32,
    height: u32,
    probe: &mut dyn LoadProbe,
) -> VideoPreset {
    let mut preset = profile.base_preset(fallback_fps, width, height);

    match probe.cpu_load_percent() {
        Some(load) if load > LOAD_THRESHOLD_PERCENT && preset.fps > MIN_FPS => {
            let fps = preset.fps.saturating_sub(FPS_STEP).max(MIN_FPS);
            warn!(
                load = load as u32,
                from = preset.fps,
                to = fps,
                "High CPU load, lowering frame rate"
            );
            preset.fps = fps;
        }
        Some(load) => debug!(load = load as u32, "CPU load within budget"),
        None => debug!("CPU load unavailable"),
    }

    info!(
        fps = preset.fps,
        bitrate_kbps = preset.bitrate_kbps,
        gop = preset.gop(),
        "Video preset selected"
    );
    preset
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLoad(Option<f32>);

    impl LoadProbe for FixedLoad {
        fn cpu_load_percent(&mut self) -> Option<f32> {
            self.0
        }
    }

    #[test]
    fn test_profile_from_model() {
        assert_eq!(
            HardwareProfile::from_model("Raspberry Pi 5 Model B Rev 1.0\0"),
            HardwareProfile::Pi5
        );
        assert_eq!(
            HardwareProfile::from_model("Raspberry Pi 4 Model B Rev 1.4"),
            HardwareProfile::Pi4
        );
        assert_eq!(HardwareProfile::from_model("QEMU"), HardwareProfile::Unknown);
    }

    #[test]
    fn test_pi5_preset() {
        let preset = select_preset(HardwareProfile::Pi5, 20, 1280, 720, &mut FixedLoad(Some(10.0)));
        assert_eq!(preset.fps, 30);
        assert_eq!(preset.bitrate_kbps, 2500);
        assert_eq!(preset.maxrate_kbps, 3000);
        assert_eq!(preset.bufsize_kbps, 4000);
        assert_eq!(preset.gop(), 120);
    }

    #[test]
    fn test_unknown_uses_fallback_fps() {
        let preset = select_preset(HardwareProfile::Unknown, 24, 1280, 720, &mut FixedLoad(None));
        assert_eq!(preset.fps, 24);
        assert_eq!(preset.bitrate_kbps, 1500);
    }

    #[test]
    fn test_load_downgrade() {
        let preset = select_preset(HardwareProfile::Pi5, 20, 1280, 720, &mut FixedLoad(Some(90.0)));
        assert_eq!(preset.fps, 25);

        let preset = select_preset(HardwareProfile::Pi4, 20, 1280, 720, &mut FixedLoad(Some(99.0)));
        assert_eq!(preset.fps, 15);
    }

    #[test]
    fn test_load_downgrade_floor() {
        let mut loaded = FixedLoad(Some(95.0));

        let preset = select_preset(HardwareProfile::Unknown, 17, 1280, 720, &mut loaded);
        assert_eq!(preset.fps, MIN_FPS);

        let preset = select_preset(HardwareProfile::Unknown, 12, 1280, 720, &mut loaded);
        assert_eq!(preset.fps, 12);
    }
}
