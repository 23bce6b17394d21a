use crate::preview::placement::SizeMode;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const SETTINGS_FILE_NAME: &str = "watchpoint_settings.json";

const MIN_JPEG_QUALITY: u32 = 1;
const MAX_JPEG_QUALITY: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaveFormat {
    #[default]
    Png,
    Jpeg,
}

impl SaveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpeg",
        }
    }
}

/// Values edited through the window's settings dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsDialogValues {
    pub show_toolbar: bool,
    pub save_format: SaveFormat,
    pub jpeg_quality: u32,
}

/// Persisted preview window options. Missing keys fall back to defaults and
/// unknown keys are carried through `extra` so a save never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewSettings {
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(default)]
    pub window_x: Option<i32>,
    #[serde(default)]
    pub window_y: Option<i32>,
    #[serde(default)]
    pub window_size_mode: SizeMode,
    /// Place the window at the last saved position when no monitor geometry
    /// is available.
    #[serde(default)]
    pub use_last_known_position: bool,
    #[serde(default = "default_show_toolbar")]
    pub show_toolbar: bool,
    #[serde(default)]
    pub save_format: SaveFormat,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u32,
    #[serde(default)]
    pub monitor_preference: Option<usize>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_window_width() -> u32 {
    800
}

fn default_window_height() -> u32 {
    600
}

fn default_show_toolbar() -> bool {
    true
}

fn default_jpeg_quality() -> u32 {
    90
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            window_width: default_window_width(),
            window_height: default_window_height(),
            window_x: None,
            window_y: None,
            window_size_mode: SizeMode::default(),
            use_last_known_position: false,
            show_toolbar: default_show_toolbar(),
            save_format: SaveFormat::default(),
            jpeg_quality: default_jpeg_quality(),
            monitor_preference: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl PreviewSettings {
    pub fn sanitize(&mut self) {
        self.jpeg_quality = self.jpeg_quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY);
        self.window_width = self.window_width.max(1);
        self.window_height = self.window_height.max(1);
    }

    pub fn last_position(&self) -> Option<(i32, i32)> {
        Some((self.window_x?, self.window_y?))
    }

    pub fn apply_dialog_values(&mut self, values: SettingsDialogValues) {
        self.show_toolbar = values.show_toolbar;
        self.save_format = values.save_format;
        self.jpeg_quality = values.jpeg_quality;
        self.sanitize();
    }
}

/// Settings shared by the supervisor (reads at window creation) and the
/// window controller (writes on geometry and format changes).
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: Mutex<PreviewSettings>,
}

impl SettingsStore {
    /// Loads settings from `path`. Never fails: unreadable or malformed files
    /// degrade to defaults and are reported through tracing.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match load_from_path(&path) {
            Ok(Some(settings)) => settings,
            Ok(None) => PreviewSettings::default(),
            Err(err) => {
                tracing::warn!(?err, path = %path.display(), "failed to load preview settings; using defaults");
                PreviewSettings::default()
            }
        };
        Self {
            path: Some(path),
            current: Mutex::new(settings),
        }
    }

    pub fn in_memory(settings: PreviewSettings) -> Self {
        Self {
            path: None,
            current: Mutex::new(settings),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> PreviewSettings {
        self.lock().clone()
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut PreviewSettings),
    {
        let mut guard = self.lock();
        f(&mut guard);
        guard.sanitize();
    }

    /// Writes the current settings. In-memory stores have nothing to persist.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        save_to_path(path, &snapshot)
    }

    fn lock(&self) -> MutexGuard<'_, PreviewSettings> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn settings_path_from_exe_path(exe_path: &Path) -> Result<PathBuf> {
    let parent = exe_path
        .parent()
        .ok_or_else(|| anyhow!("executable path has no parent: {}", exe_path.display()))?;
    Ok(parent.join(SETTINGS_FILE_NAME))
}

pub fn load_from_path(path: &Path) -> Result<Option<PreviewSettings>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read settings file {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Some(PreviewSettings::default()));
    }

    let mut loaded: PreviewSettings = serde_json::from_str(&content)
        .with_context(|| format!("deserialize settings file {}", path.display()))?;
    loaded.sanitize();
    Ok(Some(loaded))
}

/// Writes through a sibling temp file and renames it into place, so a failed
/// write leaves the previous file intact.
pub fn save_to_path(path: &Path, settings: &PreviewSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create settings folder {}", parent.display()))?;
        }
    }

    let json = serde_json::to_string_pretty(settings).context("serialize preview settings")?;
    let staging = staging_path(path);
    std::fs::write(&staging, json)
        .with_context(|| format!("write staging settings file {}", staging.display()))?;
    if let Err(err) = std::fs::rename(&staging, path) {
        let _ = std::fs::remove_file(&staging);
        return Err(err).with_context(|| format!("replace settings file {}", path.display()));
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| SETTINGS_FILE_NAME.into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_is_resolved_next_to_executable() {
        let exe = Path::new("/tmp/host/bin/host");
        let path = settings_path_from_exe_path(exe).expect("path");
        assert_eq!(path, Path::new("/tmp/host/bin").join(SETTINGS_FILE_NAME));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = SettingsStore::load(dir.path().join(SETTINGS_FILE_NAME));
        assert_eq!(store.snapshot(), PreviewSettings::default());
    }

    #[test]
    fn partial_file_is_merged_with_defaults_and_keeps_unknown_keys() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"window_width": 1024, "save_format": "jpeg", "jpeg_quality": 400, "theme": "dark"}"#,
        )
        .expect("write");

        let store = SettingsStore::load(&path);
        let settings = store.snapshot();
        assert_eq!(settings.window_width, 1024);
        assert_eq!(settings.window_height, 600);
        assert_eq!(settings.save_format, SaveFormat::Jpeg);
        assert_eq!(settings.jpeg_quality, 100);
        assert!(settings.show_toolbar);

        store.save().expect("save");
        let written = std::fs::read_to_string(&path).expect("read back");
        assert!(written.contains("\"theme\": \"dark\""));
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").expect("write");

        let store = SettingsStore::load(&path);
        assert_eq!(store.snapshot(), PreviewSettings::default());
    }

    #[test]
    fn updates_persist_across_stores() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);

        let store = SettingsStore::load(&path);
        store.update(|s| {
            s.window_x = Some(40);
            s.window_y = Some(-20);
            s.window_size_mode = SizeMode::Quarter;
        });
        store.save().expect("save");

        let reloaded = SettingsStore::load(&path).snapshot();
        assert_eq!(reloaded.last_position(), Some((40, -20)));
        assert_eq!(reloaded.window_size_mode, SizeMode::Quarter);
    }

    #[test]
    fn failed_save_leaves_previous_file_untouched() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{"window_width": 1280}"#).expect("write");
        std::fs::create_dir(staging_path(&path)).expect("block staging path");

        let store = SettingsStore::load(&path);
        store.update(|s| s.window_width = 640);
        assert!(store.save().is_err());

        let on_disk = std::fs::read_to_string(&path).expect("read");
        assert_eq!(on_disk, r#"{"window_width": 1280}"#);
    }
}
