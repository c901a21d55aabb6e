//! Supported games, their instrument variants and default calibration.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::{ProfileError, Result};
use crate::layout::{PitchKeyMap, Point, genshin_vintage_3x7_map};

/// How a game renders notes longer than a tap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SustainImplementation {
    /// Every note sounds the same regardless of how long it is held
    #[default]
    None,
    /// Long notes need a second key held alongside
    ExtraKey,
    /// Holding the key holds the note
    Native,
}

/// One instrument of a game. Variants share the game's key geometry but may
/// restrict the note range or remap pitches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantConfig {
    pub variant_type: String,
    pub variant_name: String,
    /// Inclusive `[lowest, highest]` note names; `None` accepts the whole map
    #[serde(default)]
    pub available_note_range: Option<(String, String)>,
    #[serde(default)]
    pub sustain_implementation: SustainImplementation,
    /// Overrides the game default when set; 0 disables the limit
    #[serde(default)]
    pub min_repeat_interval_ms: Option<u64>,
    /// Replaces (never merges with) the layout's own pitch map
    #[serde(default)]
    pub pitch_key_map_override: Option<PitchKeyMap>,
}

impl VariantConfig {
    pub fn new(variant_type: &str, variant_name: &str) -> Self {
        Self {
            variant_type: variant_type.to_string(),
            variant_name: variant_name.to_string(),
            available_note_range: None,
            sustain_implementation: SustainImplementation::None,
            min_repeat_interval_ms: None,
            pitch_key_map_override: None,
        }
    }

    pub fn with_note_range(mut self, low: &str, high: &str) -> Self {
        self.available_note_range = Some((low.to_string(), high.to_string()));
        self
    }

    pub fn with_pitch_key_map(mut self, map: PitchKeyMap) -> Self {
        self.pitch_key_map_override = Some(map);
        self
    }

    pub fn with_sustain(mut self, sustain: SustainImplementation) -> Self {
        self.sustain_implementation = sustain;
        self
    }
}

impl Default for VariantConfig {
    fn default() -> Self {
        VariantConfig::new("default", "default")
    }
}

/// Two calibration points for one layout; both at the origin = uncalibrated.
pub type CalibrationPair = (Point, Point);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    pub game_type: String,
    pub game_name: String,
    pub available_layout_types: Vec<String>,
    #[serde(default)]
    pub calibration_by_layout: BTreeMap<String, CalibrationPair>,
    /// First entry is the default variant
    pub variants: Vec<VariantConfig>,
    #[serde(default)]
    pub default_min_repeat_interval_ms: u64,
    #[serde(default)]
    pub package_name_hints: Vec<String>,
}

impl GameConfig {
    pub fn new(game_type: &str, layouts: &[&str], variants: Vec<VariantConfig>) -> Self {
        let available_layout_types: Vec<String> = layouts.iter().map(|l| l.to_string()).collect();
        let calibration_by_layout = available_layout_types
            .iter()
            .map(|l| (l.clone(), (Point::ORIGIN, Point::ORIGIN)))
            .collect();
        Self {
            game_type: game_type.to_string(),
            game_name: game_type.to_string(),
            available_layout_types,
            calibration_by_layout,
            variants,
            default_min_repeat_interval_ms: 0,
            package_name_hints: Vec::new(),
        }
    }

    pub fn with_min_repeat_interval(mut self, ms: u64) -> Self {
        self.default_min_repeat_interval_ms = ms;
        self
    }

    pub fn with_package_hints(mut self, hints: &[&str]) -> Self {
        self.package_name_hints = hints.iter().map(|h| h.to_string()).collect();
        self
    }

    pub fn default_variant(&self) -> Option<&VariantConfig> {
        self.variants.first()
    }

    pub fn variant(&self, variant_type: &str) -> Option<&VariantConfig> {
        self.variants.iter().find(|v| v.variant_type == variant_type)
    }

    pub fn has_layout(&self, layout_key: &str) -> bool {
        self.available_layout_types.iter().any(|l| l == layout_key)
    }

    pub fn calibration(&self, layout_key: &str) -> Option<CalibrationPair> {
        self.calibration_by_layout.get(layout_key).copied()
    }

    /// True when any hint is a substring of `package_name`.
    pub fn matches_package(&self, package_name: &str) -> bool {
        !package_name.is_empty()
            && self
                .package_name_hints
                .iter()
                .any(|hint| !hint.is_empty() && package_name.contains(hint.as_str()))
    }

    /// Check invariants, filling in missing calibration entries as uncalibrated.
    fn normalize(mut self) -> Result<Self> {
        if self.variants.is_empty() {
            return Err(ProfileError::InvalidConfig(format!("{} has no variants", self.game_type)));
        }
        if self.available_layout_types.is_empty() {
            return Err(ProfileError::InvalidConfig(format!("{} has no layouts", self.game_type)));
        }
        for layout in &self.available_layout_types {
            self.calibration_by_layout
                .entry(layout.clone())
                .or_insert((Point::ORIGIN, Point::ORIGIN));
        }
        Ok(self)
    }
}

/// Ordered list of game configurations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GameCatalog {
    games: Vec<GameConfig>,
}

impl GameCatalog {
    /// Catalog from a caller-supplied list (e.g. one restored from storage).
    pub fn new(games: Vec<GameConfig>) -> Result<Self> {
        let games = games
            .into_iter()
            .map(GameConfig::normalize)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { games })
    }

    pub fn builtin() -> Self {
        Self {
            games: BUILTIN_GAMES.clone(),
        }
    }

    pub fn games(&self) -> &[GameConfig] {
        &self.games
    }

    pub fn game_types(&self) -> Vec<String> {
        self.games.iter().map(|g| g.game_type.clone()).collect()
    }

    pub fn find_by_type(&self, game_type: &str) -> Option<&GameConfig> {
        self.games.iter().find(|g| g.game_type == game_type)
    }

    pub(crate) fn find_by_type_mut(&mut self, game_type: &str) -> Option<&mut GameConfig> {
        self.games.iter_mut().find(|g| g.game_type == game_type)
    }

    /// First game whose package hints match the foreground package name.
    pub fn find_by_package_hint(&self, package_name: &str) -> Option<&GameConfig> {
        self.games.iter().find(|g| g.matches_package(package_name))
    }

    /// Replace an entry with the same game type, or append a new one.
    pub fn upsert(&mut self, config: GameConfig) -> Result<()> {
        let config = config.normalize()?;
        match self.find_by_type_mut(&config.game_type) {
            Some(existing) => *existing = config,
            None => self.games.push(config),
        }
        Ok(())
    }

    /// Restore one game to its built-in defaults, discarding calibration.
    pub fn reset_to_builtin(&mut self, game_type: &str) -> Result<()> {
        let builtin = BUILTIN_GAMES
            .iter()
            .find(|g| g.game_type == game_type)
            .cloned()
            .ok_or_else(|| ProfileError::UnknownGame(game_type.to_string()))?;
        self.upsert(builtin)
    }
}

static BUILTIN_GAMES: LazyLock<Vec<GameConfig>> = LazyLock::new(|| {
    vec![
        GameConfig::new("Sky", &["sky_3x5", "sky_2x4"], vec![VariantConfig::default()])
            .with_min_repeat_interval(20)
            .with_package_hints(&["sky"]),
        GameConfig::new(
            "Genshin",
            &["generic_3x7"],
            vec![
                VariantConfig::new("Windsong Lyre", "Windsong Lyre"),
                VariantConfig::new("Vintage Lyre", "Vintage Lyre").with_pitch_key_map(genshin_vintage_3x7_map()),
            ],
        )
        .with_min_repeat_interval(20)
        .with_package_hints(&["genshin", "yuanshen", "ys.x"]),
        GameConfig::new("Identity V", &["generic_3x7"], vec![VariantConfig::default()])
            .with_min_repeat_interval(20)
            .with_package_hints(&["dwrg"]),
        GameConfig::new(
            "Justice Mobile",
            &["nshm_professional"],
            vec![
                VariantConfig::new("three_octaves", "Piano (C3-B5)")
                    .with_note_range("C3", "B5")
                    .with_sustain(SustainImplementation::Native),
                VariantConfig::new("two_octaves", "Piano (C4-B5)")
                    .with_note_range("C4", "B5")
                    .with_sustain(SustainImplementation::Native),
            ],
        )
        .with_min_repeat_interval(20)
        .with_package_hints(&["nshm"]),
        GameConfig::new("Customize", &["diy_3x5"], vec![VariantConfig::default()])
            .with_package_hints(&["easyplay1s"]),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutCatalog;

    #[test]
    fn builtin_games_reference_known_layouts() {
        let layouts = LayoutCatalog::builtin();
        for game in GameCatalog::builtin().games() {
            assert!(!game.variants.is_empty());
            for layout in &game.available_layout_types {
                assert!(layouts.contains(layout), "{}: {layout}", game.game_type);
                assert_eq!(game.calibration(layout), Some((Point::ORIGIN, Point::ORIGIN)));
            }
        }
    }

    #[test]
    fn package_hints_select_first_match() {
        let catalog = GameCatalog::builtin();
        let game = catalog.find_by_package_hint("com.miHoYo.Yuanshen.genshin").unwrap();
        assert_eq!(game.game_type, "Genshin");
        let game = catalog.find_by_package_hint("com.netease.dwrg").unwrap();
        assert_eq!(game.game_type, "Identity V");
        assert!(catalog.find_by_package_hint("org.example.notes").is_none());
        assert!(catalog.find_by_package_hint("").is_none());
    }

    #[test]
    fn empty_hints_never_match() {
        let game = GameConfig::new("Blank", &["sky_3x5"], vec![VariantConfig::default()]).with_package_hints(&[""]);
        assert!(!game.matches_package("anything"));
    }

    #[test]
    fn catalog_rejects_games_without_variants() {
        let game = GameConfig::new("Broken", &["sky_3x5"], vec![]);
        assert!(matches!(GameCatalog::new(vec![game]), Err(ProfileError::InvalidConfig(_))));
    }

    #[test]
    fn catalog_fills_missing_calibration() {
        let mut game = GameConfig::new("Partial", &["sky_3x5", "sky_2x4"], vec![VariantConfig::default()]);
        game.calibration_by_layout.clear();
        let catalog = GameCatalog::new(vec![game]).unwrap();
        let game = catalog.find_by_type("Partial").unwrap();
        assert_eq!(game.calibration_by_layout.len(), 2);
    }

    #[test]
    fn reset_restores_builtin_calibration() {
        let mut catalog = GameCatalog::builtin();
        let sky = catalog.find_by_type_mut("Sky").unwrap();
        sky.calibration_by_layout
            .insert("sky_3x5".into(), (Point::new(10.0, 10.0), Point::new(90.0, 90.0)));
        catalog.reset_to_builtin("Sky").unwrap();
        let sky = catalog.find_by_type("Sky").unwrap();
        assert_eq!(sky.calibration("sky_3x5"), Some((Point::ORIGIN, Point::ORIGIN)));
        assert!(matches!(catalog.reset_to_builtin("Nope"), Err(ProfileError::UnknownGame(_))));
    }

    #[test]
    fn game_config_json_shape() {
        let game = GameCatalog::builtin().find_by_type("Genshin").unwrap().clone();
        let json = serde_json::to_value(&game).unwrap();
        assert_eq!(json["gameType"], "Genshin");
        assert_eq!(json["calibrationByLayout"]["generic_3x7"], serde_json::json!([[0.0, 0.0], [0.0, 0.0]]));
        assert_eq!(json["variants"][1]["pitchKeyMapOverride"]["D3#"], 3);
        assert_eq!(json["variants"][0]["sustainImplementation"], "none");
        let back: GameConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, game);
    }
}
