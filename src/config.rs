//! Configuration surface: `[section] key = value` INI parsed
//! by the `ini` crate, with typed accessors that never panic. Unknown keys
//! log a `WARNING` and fall back to defaults; a missing required key in a
//! present section is a fatal `ConfigError` at startup, recoverable mid-run
//! through the config-change barrier by keeping the old value.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;

use crate::error::CoreError;
use crate::storage::FdcMode;

/// `[mixer]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct MixerConfig {
    pub rate_hz: u32,
    pub samples: u32,
    pub prebuffer_ms: u32,
    pub volume: f32,
    pub profile: String,
}

impl Default for MixerConfig {
    fn default() -> Self {
        MixerConfig { rate_hz: 48_000, samples: 512, prebuffer_ms: 25, volume: 1.0, profile: "none".into() }
    }
}

/// `[soundfx]` section.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SoundFxConfig {
    pub enabled: bool,
    pub volume: f32,
    pub source_volumes: HashMap<String, f32>,
    pub reverb: Option<String>,
}

/// One `[disk_*]` device section.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskConfig {
    pub drive_type: u32,
    pub path: Option<PathBuf>,
    pub cylinders: u32,
    pub heads: u32,
    pub sectors_per_track: u32,
    pub seek_max_ms: f64,
    pub seek_trk_ms: f64,
    pub rot_speed_rpm: f64,
    pub interleave: u32,
    pub spinup_time_ms: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        use crate::storage::hdd::TYPE_35;
        DiskConfig {
            drive_type: TYPE_35.index,
            path: None,
            cylinders: TYPE_35.geometry.cylinders,
            heads: TYPE_35.geometry.heads,
            sectors_per_track: TYPE_35.geometry.sectors_per_track,
            seek_max_ms: TYPE_35.performance.seek_max_ms,
            seek_trk_ms: TYPE_35.performance.seek_trk_ms,
            rot_speed_rpm: TYPE_35.performance.rot_speed_rpm,
            interleave: TYPE_35.performance.interleave,
            spinup_time_ms: 3_000,
        }
    }
}

/// `[drives]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct DrivesConfig {
    pub cdrom: bool,
    pub cdrom_idle_s: u64,
    pub fdd_a: Option<PathBuf>,
    pub fdd_b: Option<PathBuf>,
    pub fdc_mode: FdcMode,
}

impl Default for DrivesConfig {
    fn default() -> Self {
        DrivesConfig { cdrom: false, cdrom_idle_s: 30, fdd_a: None, fdd_b: None, fdc_mode: FdcMode::PcAt }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub mixer: MixerConfig,
    pub soundfx: SoundFxConfig,
    pub disks: HashMap<String, DiskConfig>,
    pub drives: DrivesConfig,
}

/// Borrows a section's raw key/value view, logging and defaulting on any
/// malformed value rather than panicking.
struct SectionView<'a> {
    section: &'a str,
    props: Option<&'a ini::Properties>,
}

impl<'a> SectionView<'a> {
    fn get_str(&self, key: &str) -> Option<&'a str> {
        self.props.and_then(|p| p.get(key))
    }

    fn get_int<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get_str(key) {
            None => default,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                log::warn!("config [{}] {key}={raw}: out of range, keeping default", self.section);
                default
            }),
        }
    }

    fn get_real(&self, key: &str, default: f64) -> f64 {
        self.get_int(key, default)
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get_str(key) {
            None => default,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    log::warn!("config [{}] {key}={raw}: not a bool, keeping default", self.section);
                    default
                }
            },
        }
    }

    fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).filter(|s| !s.is_empty()).map(PathBuf::from)
    }

    fn get_enum<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get_str(key) {
            None => default,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                log::warn!("config [{}] {key}={raw}: unrecognized enum, keeping default", self.section);
                default
            }),
        }
    }
}

impl FromStr for FdcMode {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "pc-at" => Ok(FdcMode::PcAt),
            "model30" => Ok(FdcMode::Model30),
            _ => Err(()),
        }
    }
}

impl Config {
    /// Parses a config file at `path`. Missing required keys in a *present*
    /// section are a fatal `ConfigError`; a missing section keeps built-in
    /// defaults entirely. Unknown keys are not rejected (logging an
    /// unrecognized key is the parser's job, not the typed accessors').
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let ini = Ini::load_from_file(path)
            .map_err(|e| CoreError::config("<file>", path.display().to_string(), e.to_string()))?;
        Self::from_ini(&ini)
    }

    pub fn from_ini(ini: &Ini) -> Result<Self, CoreError> {
        let mut config = Config::default();

        let mixer_view = SectionView { section: "mixer", props: ini.section(Some("mixer")) };
        config.mixer = MixerConfig {
            rate_hz: mixer_view.get_int("rate", config.mixer.rate_hz),
            samples: mixer_view.get_int("samples", config.mixer.samples),
            prebuffer_ms: mixer_view.get_int("prebuffer_ms", config.mixer.prebuffer_ms),
            volume: mixer_view.get_real("volume", config.mixer.volume as f64) as f32,
            profile: mixer_view.get_str("profile").map(str::to_string).unwrap_or(config.mixer.profile),
        };

        if let Some(props) = ini.section(Some("soundfx")) {
            let view = SectionView { section: "soundfx", props: Some(props) };
            let mut source_volumes = HashMap::new();
            for (key, value) in props.iter() {
                if let Some(source) = key.strip_prefix("volume_") {
                    if let Ok(v) = value.trim().parse::<f32>() {
                        source_volumes.insert(source.to_string(), v);
                    } else {
                        log::warn!("config [soundfx] {key}={value}: out of range, ignoring");
                    }
                }
            }
            config.soundfx = SoundFxConfig {
                enabled: view.get_bool("enabled", false),
                volume: view.get_real("volume", 1.0) as f32,
                source_volumes,
                reverb: view.get_str("reverb").filter(|s| *s != "none").map(str::to_string),
            };
        }

        for (header, props) in ini.iter() {
            let Some(header) = header else { continue };
            let Some(name) = header.strip_prefix("disk_") else { continue };
            let view = SectionView { section: header, props: Some(props) };
            let default = DiskConfig::default();
            let required = ["type", "cylinders", "heads", "spt"];
            for key in required {
                if view.get_str(key).is_none() {
                    return Err(CoreError::config(header, key, "missing required key"));
                }
            }
            let disk = DiskConfig {
                drive_type: view.get_int("type", default.drive_type),
                path: view.get_path("path"),
                cylinders: view.get_int("cylinders", default.cylinders),
                heads: view.get_int("heads", default.heads),
                sectors_per_track: view.get_int("spt", default.sectors_per_track),
                seek_max_ms: view.get_real("seek_max", default.seek_max_ms),
                seek_trk_ms: view.get_real("seek_trk", default.seek_trk_ms),
                rot_speed_rpm: view.get_real("rot_speed", default.rot_speed_rpm),
                interleave: view.get_int("interleave", default.interleave),
                spinup_time_ms: view.get_int("spinup_time", default.spinup_time_ms),
            };
            config.disks.insert(name.to_string(), disk);
        }

        let drives_view = SectionView { section: "drives", props: ini.section(Some("drives")) };
        config.drives = DrivesConfig {
            cdrom: drives_view.get_bool("cdrom", config.drives.cdrom),
            cdrom_idle_s: drives_view.get_int("cdrom_idle", config.drives.cdrom_idle_s),
            fdd_a: drives_view.get_path("fdd_a"),
            fdd_b: drives_view.get_path("fdd_b"),
            fdc_mode: drives_view.get_enum("fdc_mode", config.drives.fdc_mode),
        };

        Ok(config)
    }

    /// Re-reads `path`, keeping every previous value whose new reading
    /// fails to parse.
    pub fn reload_keeping_previous(&mut self, path: &Path) {
        match Self::load(path) {
            Ok(fresh) => *self = fresh,
            Err(e) => log::warn!("config reload failed, keeping previous config: {e}"),
        }
    }

    /// Serializes the live config back to INI text for `state.ini`.
    pub fn to_ini_string(&self) -> String {
        let mut ini = Ini::new();
        ini.with_section(Some("mixer"))
            .set("rate", self.mixer.rate_hz.to_string())
            .set("samples", self.mixer.samples.to_string())
            .set("prebuffer_ms", self.mixer.prebuffer_ms.to_string())
            .set("volume", self.mixer.volume.to_string())
            .set("profile", self.mixer.profile.clone());

        ini.with_section(Some("soundfx"))
            .set("enabled", self.soundfx.enabled.to_string())
            .set("volume", self.soundfx.volume.to_string())
            .set("reverb", self.soundfx.reverb.clone().unwrap_or_else(|| "none".into()));
        for (source, vol) in &self.soundfx.source_volumes {
            ini.with_section(Some("soundfx")).set(format!("volume_{source}"), vol.to_string());
        }

        for (name, disk) in &self.disks {
            let header = format!("disk_{name}");
            ini.with_section(Some(header))
                .set("type", disk.drive_type.to_string())
                .set("path", disk.path.as_ref().map(|p| p.display().to_string()).unwrap_or_default())
                .set("cylinders", disk.cylinders.to_string())
                .set("heads", disk.heads.to_string())
                .set("spt", disk.sectors_per_track.to_string())
                .set("seek_max", disk.seek_max_ms.to_string())
                .set("seek_trk", disk.seek_trk_ms.to_string())
                .set("rot_speed", disk.rot_speed_rpm.to_string())
                .set("interleave", disk.interleave.to_string())
                .set("spinup_time", disk.spinup_time_ms.to_string());
        }

        ini.with_section(Some("drives"))
            .set("cdrom", self.drives.cdrom.to_string())
            .set("cdrom_idle", self.drives.cdrom_idle_s.to_string())
            .set("fdd_a", self.drives.fdd_a.as_ref().map(|p| p.display().to_string()).unwrap_or_default())
            .set("fdd_b", self.drives.fdd_b.as_ref().map(|p| p.display().to_string()).unwrap_or_default())
            .set("fdc_mode", match self.drives.fdc_mode { FdcMode::PcAt => "pc-at", FdcMode::Model30 => "model30" });

        let mut buf = Vec::new();
        ini.write_to(&mut buf).expect("write_to a Vec<u8> cannot fail");
        String::from_utf8(buf).expect("ini writer always emits valid utf-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn missing_file_sections_keep_defaults() {
        let f = write_ini("");
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.mixer, MixerConfig::default());
        assert_eq!(config.drives, DrivesConfig::default());
    }

    #[test]
    fn mixer_section_overrides_defaults() {
        let f = write_ini("[mixer]\nrate = 44100\nprebuffer_ms = 40\nvolume = 0.5\n");
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.mixer.rate_hz, 44_100);
        assert_eq!(config.mixer.prebuffer_ms, 40);
        assert_eq!(config.mixer.volume, 0.5);
    }

    #[test]
    fn out_of_range_numeric_value_logs_and_keeps_default() {
        let f = write_ini("[mixer]\nrate = not-a-number\n");
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.mixer.rate_hz, MixerConfig::default().rate_hz);
    }

    #[test]
    fn unrecognized_enum_keeps_default() {
        let f = write_ini("[drives]\nfdc_mode = bogus\n");
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.drives.fdc_mode, FdcMode::PcAt);
    }

    #[test]
    fn disk_section_missing_required_key_is_a_config_error() {
        let f = write_ini("[disk_c]\npath = /tmp/c.img\n");
        let err = Config::load(f.path()).unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn disk_section_with_required_keys_parses() {
        let f = write_ini("[disk_c]\ntype = 35\ncylinders = 921\nheads = 5\nspt = 17\n");
        let config = Config::load(f.path()).unwrap();
        let disk = config.disks.get("c").unwrap();
        assert_eq!((disk.cylinders, disk.heads, disk.sectors_per_track), (921, 5, 17));
    }

    #[test]
    fn to_ini_string_round_trips_through_load() {
        let mut config = Config::default();
        config.mixer.rate_hz = 22_050;
        config.disks.insert("c".into(), DiskConfig::default());
        let text = config.to_ini_string();
        let f = write_ini(&text);
        let reloaded = Config::load(f.path()).unwrap();
        assert_eq!(reloaded.mixer.rate_hz, 22_050);
        assert!(reloaded.disks.contains_key("c"));
    }

    #[test]
    fn reload_keeping_previous_ignores_a_now_unreadable_file() {
        let mut config = Config::default();
        config.mixer.rate_hz = 12_345;
        config.reload_keeping_previous(Path::new("/nonexistent/path.ini"));
        assert_eq!(config.mixer.rate_hz, 12_345);
    }
}
