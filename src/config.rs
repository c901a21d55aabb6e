//! Persisted settings: the saved game catalog, the last selection, manual key
//! positions and sustain tuning.
//!
//! The engine itself never touches storage; the application restores a
//! [`ProfileSession`] from a [`ConfigStore`] at start-up and writes changes back.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::dispatcher::{
    DEFAULT_SUSTAIN_DELAY_MS, DEFAULT_SUSTAIN_HOLD_MS, DispatchMode, DispatchSettings,
};
use crate::error::ConfigError;
use crate::game::{GameCatalog, GameConfig};
use crate::layout::Point;
use crate::profile::ProfileSession;

pub const USER_GAME_PROFILE: &str = "userGameProfile";
pub const ACTIVE_CONFIG_NAME: &str = "activeConfigName";
pub const LAST_CONFIG_NAME: &str = "lastConfigName";
pub const LAST_VARIANT_NAME: &str = "lastVariantName";
pub const LAST_KEY_TYPE_NAME: &str = "lastKeyTypeName";
pub const KEY_POSITION_OVERRIDES: &str = "keyPositionOverrides";
pub const SUSTAIN_ENABLED: &str = "sustainEnabled";
pub const SUSTAIN_HOLD_MS: &str = "sustainHoldMs";
pub const SUSTAIN_DELAY_MS: &str = "sustainDelayMs";

/// Flat key/value settings store holding JSON values.
pub trait ConfigStore {
    fn read(&self, key: &str) -> Option<Value>;

    fn write(&mut self, key: &str, value: Value) -> Result<(), ConfigError>;

    fn remove(&mut self, key: &str) -> Result<(), ConfigError>;

    /// Typed read; a missing or mistyped value yields `default`.
    fn read_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T
    where
        Self: Sized,
    {
        self.read(key)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(default)
    }

    fn write_as<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        Self: Sized,
    {
        let value = serde_json::to_value(value)?;
        self.write(key, value)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn read(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn write(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), ConfigError> {
        self.values.remove(key);
        Ok(())
    }
}

/// A JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl JsonFileStore {
    /// `<config dir>/miditotouch/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("miditotouch").join("config.json"))
    }

    /// Open the store at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let values = if path.exists() {
            let text = fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            Map::new()
        };
        log::debug!("Opened config {} ({} keys)", path.display(), values.len());
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

impl ConfigStore for JsonFileStore {
    fn read(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn write(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        self.values.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), ConfigError> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

fn load_catalog<S: ConfigStore>(store: &mut S) -> Result<GameCatalog, ConfigError> {
    let Some(saved) = store.read(USER_GAME_PROFILE) else {
        return Ok(GameCatalog::builtin());
    };
    if saved.is_null() {
        return Ok(GameCatalog::builtin());
    }
    let parsed = serde_json::from_value::<Vec<GameConfig>>(saved)
        .map_err(|e| e.to_string())
        .and_then(|games| GameCatalog::new(games).map_err(|e| e.to_string()));
    match parsed {
        Ok(catalog) => Ok(catalog),
        Err(e) => {
            log::warn!("Saved game profile unusable ({e}), using built-in games");
            store.remove(USER_GAME_PROFILE)?;
            Ok(GameCatalog::builtin())
        }
    }
}

/// Rebuild the session saved in `store`.
///
/// A game whose package hints match `foreground_package` takes precedence over
/// the saved one. When the game differs from last time the saved variant and
/// layout are discarded. The resolved selection is written back.
pub fn restore_session<S: ConfigStore>(
    store: &mut S,
    foreground_package: Option<&str>,
) -> Result<ProfileSession, ConfigError> {
    let mut session = ProfileSession::new(load_catalog(store)?);

    let last_game: String = store.read_or(LAST_CONFIG_NAME, String::new());
    let active: Option<String> = store.read_or(ACTIVE_CONFIG_NAME, None);
    if let Some(active) = active.as_deref() {
        if let Err(e) = session.select_game(active) {
            log::warn!("Saved game unavailable: {e}");
        }
    }
    if let Some(package) = foreground_package {
        if session.select_game_by_package(package) {
            if let Some(game) = session.current_game() {
                store.write_as(ACTIVE_CONFIG_NAME, &game.game_type)?;
            }
        }
    }

    let Some(game_type) = session.current_game().map(|g| g.game_type.clone()) else {
        log::warn!("No matching game configuration found");
        return Ok(session);
    };

    if last_game != game_type {
        store.write_as(LAST_CONFIG_NAME, &game_type)?;
        store.write_as(LAST_VARIANT_NAME, &"")?;
        store.write_as(LAST_KEY_TYPE_NAME, &"")?;
    }

    let last_variant: String = store.read_or(LAST_VARIANT_NAME, String::new());
    if last_variant.is_empty() || session.select_variant(&last_variant).is_err() {
        session.select_default_variant();
    }
    let last_layout: String = store.read_or(LAST_KEY_TYPE_NAME, String::new());
    if last_layout.is_empty() || session.select_layout(&last_layout).is_err() {
        session.select_default_layout();
    }

    save_selection(store, &session)?;
    log::info!("Restored configuration {}", session.identifier_triple());
    Ok(session)
}

/// Persist the current game/variant/layout triple.
pub fn save_selection<S: ConfigStore>(store: &mut S, session: &ProfileSession) -> Result<(), ConfigError> {
    let Some(game) = session.current_game() else {
        return Ok(());
    };
    store.write_as(ACTIVE_CONFIG_NAME, &game.game_type)?;
    store.write_as(LAST_CONFIG_NAME, &game.game_type)?;
    if let Some(variant) = session.current_variant() {
        store.write_as(LAST_VARIANT_NAME, &variant.variant_type)?;
    }
    if let Some(layout) = session.current_layout_key() {
        store.write_as(LAST_KEY_TYPE_NAME, &layout)?;
    }
    Ok(())
}

/// Persist the whole game list, calibration included.
pub fn save_catalog<S: ConfigStore>(store: &mut S, session: &ProfileSession) -> Result<(), ConfigError> {
    store.write_as(USER_GAME_PROFILE, &session.games().games())
}

type OverridesByLayout = BTreeMap<String, BTreeMap<usize, Point>>;

/// Manual key positions saved for `layout_key`.
pub fn load_position_overrides<S: ConfigStore>(store: &S, layout_key: &str) -> BTreeMap<usize, Point> {
    let mut all: OverridesByLayout = store.read_or(KEY_POSITION_OVERRIDES, OverridesByLayout::new());
    all.remove(layout_key).unwrap_or_default()
}

/// Replace the manual key positions of `layout_key`; an empty map removes them.
pub fn save_position_overrides<S: ConfigStore>(
    store: &mut S,
    layout_key: &str,
    overrides: &BTreeMap<usize, Point>,
) -> Result<(), ConfigError> {
    let mut all: OverridesByLayout = store.read_or(KEY_POSITION_OVERRIDES, OverridesByLayout::new());
    if overrides.is_empty() {
        all.remove(layout_key);
    } else {
        all.insert(layout_key.to_string(), overrides.clone());
    }
    store.write_as(KEY_POSITION_OVERRIDES, &all)
}

/// Sustain mode tuning as persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SustainConfig {
    pub enabled: bool,
    pub hold_ms: u64,
    pub delay_ms: u64,
}

impl Default for SustainConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hold_ms: DEFAULT_SUSTAIN_HOLD_MS,
            delay_ms: DEFAULT_SUSTAIN_DELAY_MS,
        }
    }
}

impl SustainConfig {
    pub fn load<S: ConfigStore>(store: &S) -> Self {
        let defaults = Self::default();
        Self {
            enabled: store.read_or(SUSTAIN_ENABLED, defaults.enabled),
            hold_ms: store.read_or(SUSTAIN_HOLD_MS, defaults.hold_ms),
            delay_ms: store.read_or(SUSTAIN_DELAY_MS, defaults.delay_ms),
        }
    }

    pub fn save<S: ConfigStore>(&self, store: &mut S) -> Result<(), ConfigError> {
        store.write_as(SUSTAIN_ENABLED, &self.enabled)?;
        store.write_as(SUSTAIN_HOLD_MS, &self.hold_ms)?;
        store.write_as(SUSTAIN_DELAY_MS, &self.delay_ms)
    }

    pub fn apply(&self, settings: &DispatchSettings) {
        settings.set_mode(if self.enabled {
            DispatchMode::Sustained
        } else {
            DispatchMode::Discrete
        });
        settings.set_sustain_hold_ms(self.hold_ms);
        settings.set_sustain_delay_ms(self.delay_ms);
    }
}
