//! The profile session: active game/layout/variant selection, calibration and
//! the derived key positions and pitch map.
//!
//! Derived data is computed lazily and cached. Every selection or calibration
//! setter clears the caches it invalidates before returning, so readers never
//! observe a cache built from a previous selection. Setters take `&mut self`;
//! share a session between threads behind a `RwLock` so a selection change
//! holds exclusive access while lookups run concurrently under read locks.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ProfileError, Result};
use crate::game::{CalibrationPair, GameCatalog, GameConfig, VariantConfig};
use crate::layout::{KeyLayout, LayoutCatalog, LayoutGeometry, Point};
use crate::pitch::{Pitch, is_half_step, name_to_midi_pitch};

/// MIDI pitch -> 1-based key number.
pub type PitchToKey = BTreeMap<Pitch, usize>;

#[derive(Default)]
struct SessionCache {
    key_positions: Option<Arc<Vec<Point>>>,
    pitch_to_key: Option<Arc<PitchToKey>>,
    // `Some(None)` caches "the map is empty"
    note_range: Option<Option<(Pitch, Pitch)>>,
}

pub struct ProfileSession {
    layouts: Arc<LayoutCatalog>,
    games: GameCatalog,
    current_game: Option<String>,
    current_layout: Option<String>,
    current_variant: Option<String>,
    cache: Mutex<SessionCache>,
}

impl ProfileSession {
    /// Empty session over the given games and the built-in layouts.
    pub fn new(games: GameCatalog) -> Self {
        Self::with_layouts(games, LayoutCatalog::builtin())
    }

    pub fn with_layouts(games: GameCatalog, layouts: Arc<LayoutCatalog>) -> Self {
        Self {
            layouts,
            games,
            current_game: None,
            current_layout: None,
            current_variant: None,
            cache: Mutex::new(SessionCache::default()),
        }
    }

    pub fn builtin() -> Self {
        Self::new(GameCatalog::builtin())
    }

    pub fn games(&self) -> &GameCatalog {
        &self.games
    }

    pub fn layouts(&self) -> &LayoutCatalog {
        &self.layouts
    }

    /// Swap in a new game list. The selection survives only if its game does.
    pub fn replace_catalog(&mut self, games: GameCatalog) {
        self.games = games;
        let still_present = self
            .current_game
            .as_deref()
            .is_some_and(|g| self.games.find_by_type(g).is_some());
        if !still_present {
            self.current_game = None;
            self.current_layout = None;
            self.current_variant = None;
        }
        self.invalidate_caches();
    }

    /// Restore one game to its built-in configuration.
    pub fn reset_game(&mut self, game_type: &str) -> Result<()> {
        self.games.reset_to_builtin(game_type)?;
        if self.current_game.as_deref() == Some(game_type) {
            self.current_layout = None;
            self.current_variant = None;
        }
        self.invalidate_caches();
        Ok(())
    }

    // ---- selection ----

    /// Make `game_type` current. Layout and variant revert to the game's defaults.
    pub fn select_game(&mut self, game_type: &str) -> Result<()> {
        if self.games.find_by_type(game_type).is_none() {
            return Err(ProfileError::UnknownGame(game_type.to_string()));
        }
        log::info!("Selected game {game_type}");
        self.current_game = Some(game_type.to_string());
        self.current_layout = None;
        self.current_variant = None;
        self.invalidate_caches();
        Ok(())
    }

    /// Select the game matching a foreground package name.
    ///
    /// Keeps the current game when its own hints already match. Returns
    /// whether a matching game is now current.
    pub fn select_game_by_package(&mut self, package_name: &str) -> bool {
        if self.current_game().is_some_and(|g| g.matches_package(package_name)) {
            return true;
        }
        let Some(game_type) = self
            .games
            .find_by_package_hint(package_name)
            .map(|g| g.game_type.clone())
        else {
            return false;
        };
        self.select_game(&game_type).is_ok()
    }

    pub fn select_layout(&mut self, layout_key: &str) -> Result<()> {
        let game = self.current_game().ok_or_else(|| invalid("layout", layout_key))?;
        if !game.has_layout(layout_key) {
            return Err(invalid("layout", layout_key));
        }
        // Fail here rather than on the first lookup.
        self.layouts.get(layout_key)?;
        log::info!("Selected layout {layout_key}");
        self.current_layout = Some(layout_key.to_string());
        self.invalidate_caches();
        Ok(())
    }

    pub fn select_variant(&mut self, variant_type: &str) -> Result<()> {
        let game = self.current_game().ok_or_else(|| invalid("variant", variant_type))?;
        if game.variant(variant_type).is_none() {
            return Err(invalid("variant", variant_type));
        }
        log::info!("Selected variant {variant_type}");
        self.current_variant = Some(variant_type.to_string());
        self.invalidate_caches();
        Ok(())
    }

    pub fn select_default_layout(&mut self) {
        self.current_layout = None;
        self.invalidate_caches();
    }

    pub fn select_default_variant(&mut self) {
        self.current_variant = None;
        self.invalidate_caches();
    }

    /// Store calibration points for the current layout of the current game.
    pub fn set_calibration(&mut self, a: Point, b: Point) -> Result<()> {
        let game_type = self
            .current_game
            .clone()
            .ok_or_else(|| ProfileError::PositionUnavailable("no game selected".into()))?;
        let layout_key = self
            .current_layout_key()
            .map(str::to_string)
            .ok_or_else(|| ProfileError::PositionUnavailable("no layout selected".into()))?;
        let game = self
            .games
            .find_by_type_mut(&game_type)
            .ok_or_else(|| ProfileError::UnknownGame(game_type.clone()))?;
        game.calibration_by_layout.insert(layout_key.clone(), (a, b));
        log::info!("Calibrated {game_type}/{layout_key}: {a:?} {b:?}");
        self.cache.lock().key_positions = None;
        Ok(())
    }

    /// Drop every derived cache.
    pub fn invalidate_caches(&self) {
        *self.cache.lock() = SessionCache::default();
    }

    // ---- current selection ----

    pub fn current_game(&self) -> Option<&GameConfig> {
        self.current_game.as_deref().and_then(|g| self.games.find_by_type(g))
    }

    /// Selected layout, or the game's first layout until one is selected.
    pub fn current_layout_key(&self) -> Option<&str> {
        let game = self.current_game()?;
        match &self.current_layout {
            Some(key) => Some(key.as_str()),
            None => game.available_layout_types.first().map(String::as_str),
        }
    }

    pub fn current_layout(&self) -> Option<&KeyLayout> {
        self.current_layout_key().and_then(|k| self.layouts.get(k).ok())
    }

    /// Selected variant, or the game's default variant until one is selected.
    pub fn current_variant(&self) -> Option<&VariantConfig> {
        let game = self.current_game()?;
        match &self.current_variant {
            Some(v) => game.variant(v),
            None => game.default_variant(),
        }
    }

    pub fn calibration(&self) -> Option<CalibrationPair> {
        let layout_key = self.current_layout_key()?;
        self.current_game()?.calibration(layout_key)
    }

    /// Minimum interval between repeats of one key: variant value, else game default.
    pub fn min_repeat_interval_ms(&self) -> Option<u64> {
        let game = self.current_game()?;
        let variant_value = self.current_variant().and_then(|v| v.min_repeat_interval_ms);
        Some(variant_value.unwrap_or(game.default_min_repeat_interval_ms))
    }

    /// Variant label for display; empty when the game only has one variant.
    pub fn variant_display_name(&self) -> Option<String> {
        let game = self.current_game()?;
        let variant = self.current_variant()?;
        if game.variants.len() == 1 {
            return Some(String::new());
        }
        Some(variant.variant_name.clone())
    }

    pub fn layout_display_name(&self) -> Option<String> {
        self.current_layout().map(|l| l.display_name.clone())
    }

    /// `"<game>-<layout>-<variant>"`, with empty parts for anything unset.
    pub fn identifier_triple(&self) -> String {
        format!(
            "{}-{}-{}",
            self.current_game.as_deref().unwrap_or(""),
            self.current_layout_key().unwrap_or(""),
            self.current_variant().map(|v| v.variant_type.as_str()).unwrap_or("")
        )
    }

    // ---- key positions ----

    fn positions(&self) -> Result<Arc<Vec<Point>>> {
        if let Some(cached) = &self.cache.lock().key_positions {
            return Ok(cached.clone());
        }
        let game = self
            .current_game()
            .ok_or_else(|| ProfileError::PositionUnavailable("no game selected".into()))?;
        let layout_key = self
            .current_layout_key()
            .ok_or_else(|| ProfileError::PositionUnavailable("no layout selected".into()))?;
        let layout = self.layouts.get(layout_key)?;
        let (a, b) = game
            .calibration(layout_key)
            .filter(|(a, b)| !(a.is_origin() && b.is_origin()))
            .ok_or_else(|| ProfileError::PositionUnavailable(format!("layout {layout_key} is not calibrated")))?;

        let positions = Arc::new(generate_key_positions(layout, a, b, self.current_variant())?);
        log::debug!("Generated {} key positions for {layout_key}: {positions:?}", positions.len());
        self.cache.lock().key_positions = Some(positions.clone());
        Ok(positions)
    }

    /// Screen position of a 0-based key index.
    pub fn key_position(&self, index: usize) -> Result<Point> {
        let positions = self.positions()?;
        positions.get(index).copied().ok_or(ProfileError::KeyOutOfRange {
            index,
            count: positions.len(),
        })
    }

    pub fn all_key_positions(&self) -> Result<Vec<Point>> {
        Ok(self.positions()?.as_ref().clone())
    }

    /// Other keys ordered by distance from `index`, nearest first.
    pub fn physically_closest_keys(&self, index: usize) -> Result<Vec<(usize, f64)>> {
        let positions = self.positions()?;
        let origin = *positions.get(index).ok_or(ProfileError::KeyOutOfRange {
            index,
            count: positions.len(),
        })?;
        let mut keys: Vec<(usize, f64)> = positions
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(i, p)| (i, origin.distance(p)))
            .collect();
        keys.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(keys)
    }

    /// Smallest distance between any two keys; `None` with fewer than two keys.
    pub fn min_key_distance(&self) -> Result<Option<f64>> {
        let positions = self.positions()?;
        let mut min: Option<f64> = None;
        for (i, a) in positions.iter().enumerate() {
            for b in &positions[i + 1..] {
                let d = a.distance(b);
                min = Some(min.map_or(d, |m| m.min(d)));
            }
        }
        Ok(min)
    }

    /// 0-based key index of a grid cell, counting rows from the top of the screen.
    pub fn key_index_at(&self, row_from_top: usize, column: usize) -> Result<usize> {
        let layout = self
            .current_layout()
            .ok_or_else(|| ProfileError::PositionUnavailable("no layout selected".into()))?;
        let LayoutGeometry::Grid { row, column: columns } = layout.geometry else {
            return Err(ProfileError::PositionUnavailable(format!(
                "{} is not a grid layout",
                layout.display_name
            )));
        };
        if row_from_top >= row || column >= columns {
            return Err(ProfileError::KeyOutOfRange {
                index: row_from_top.saturating_mul(columns).saturating_add(column),
                count: row * columns,
            });
        }
        Ok((row - 1 - row_from_top) * columns + column)
    }

    // ---- pitch mapping ----

    fn pitch_map(&self) -> Result<Arc<PitchToKey>> {
        if let Some(cached) = &self.cache.lock().pitch_to_key {
            return Ok(cached.clone());
        }
        let layout = self
            .current_layout()
            .ok_or_else(|| ProfileError::GenerationFailed("no game or layout selected".into()))?;
        let variant = self
            .current_variant()
            .ok_or_else(|| ProfileError::GenerationFailed("no variant selected".into()))?;

        let map = Arc::new(generate_pitch_key_map(layout, variant)?);
        log::debug!("Generated pitch map for {}: {map:?}", self.identifier_triple());
        self.cache.lock().pitch_to_key = Some(map.clone());
        Ok(map)
    }

    /// 0-based key for a pitch; `Ok(None)` when the pitch is not mapped.
    pub fn key_for_pitch(&self, pitch: Pitch) -> Result<Option<usize>> {
        Ok(self.pitch_map()?.get(&pitch).map(|key| key - 1))
    }

    /// Lowest and highest mapped pitch.
    pub fn note_range(&self) -> Result<Option<(Pitch, Pitch)>> {
        if let Some(cached) = self.cache.lock().note_range {
            return Ok(cached);
        }
        let map = self.pitch_map()?;
        let range = map.keys().next().zip(map.keys().next_back()).map(|(lo, hi)| (*lo, *hi));
        self.cache.lock().note_range = Some(range);
        Ok(range)
    }

    /// Lowest and highest mapped 1-based key number.
    pub fn key_range(&self) -> Result<Option<(usize, usize)>> {
        let map = self.pitch_map()?;
        let min = map.values().min().copied();
        let max = map.values().max().copied();
        Ok(min.zip(max))
    }
}

fn invalid(kind: &'static str, key: &str) -> ProfileError {
    ProfileError::InvalidSelection {
        kind,
        key: key.to_string(),
    }
}

fn parse_range(variant: &VariantConfig) -> Result<Option<(Pitch, Pitch)>> {
    match &variant.available_note_range {
        Some((low, high)) => Ok(Some((name_to_midi_pitch(low)?, name_to_midi_pitch(high)?))),
        None => Ok(None),
    }
}

/// Absolute key positions for a layout calibrated by points `a` and `b`.
///
/// Key order follows the layout's key numbering: for grids, row-major from
/// the bottom-left key. Coordinates are rounded to whole pixels.
pub fn generate_key_positions(
    layout: &KeyLayout,
    a: Point,
    b: Point,
    variant: Option<&VariantConfig>,
) -> Result<Vec<Point>> {
    let (top_left, bottom_right) = layout.locator.normalize(a, b);
    let width = bottom_right.x - top_left.x;
    let height = bottom_right.y - top_left.y;

    match &layout.geometry {
        LayoutGeometry::Grid { row, column } => {
            let (row, column) = (*row, *column);
            let key_width = if column > 1 { width / (column - 1) as f64 } else { 0.0 };
            let key_height = if row > 1 { height / (row - 1) as f64 } else { 0.0 };
            let mut positions = Vec::with_capacity(row * column);
            for i in 0..row {
                for j in 0..column {
                    let x = top_left.x + j as f64 * key_width;
                    let y = top_left.y + (row - i - 1) as f64 * key_height;
                    positions.push(Point::new(x, y).rounded());
                }
            }
            Ok(positions)
        }
        LayoutGeometry::Arbitrary { relative_positions } => Ok(relative_positions
            .iter()
            .map(|rel| Point::new(top_left.x + rel.x * width, top_left.y + rel.y * height).rounded())
            .collect()),
        LayoutGeometry::Professional => {
            let variant = variant.ok_or_else(|| ProfileError::GenerationFailed("no variant selected".into()))?;
            let (start, end) = parse_range(variant)?.ok_or_else(|| {
                ProfileError::GenerationFailed(format!(
                    "variant {} has no note range for a professional layout",
                    variant.variant_type
                ))
            })?;
            let relative = professional_relative_positions(start, end)?;
            Ok(fit_relative(&relative, top_left, bottom_right))
        }
    }
}

struct RelativeKeys {
    positions: Vec<Point>,
    // leftmost upper-row x and rightmost lower-row x
    left: f64,
    right: f64,
}

// Upper row (y = 0) holds the black keys, lower row (y = 1) the white keys.
fn professional_relative_positions(start: Pitch, end: Pitch) -> Result<RelativeKeys> {
    if start > end {
        return Err(ProfileError::GenerationFailed(format!("empty note range {start}..={end}")));
    }
    let mut cursor = 0.0;
    let mut left = None;
    let mut right = None;
    let mut positions = Vec::with_capacity((end - start) as usize + 1);
    for pitch in start..=end {
        let pos = if is_half_step(pitch) {
            let pos = Point::new(cursor, 0.0);
            cursor += 0.5;
            if left.is_none() {
                left = Some(pos.x);
            }
            pos
        } else {
            let pos = Point::new(cursor, 1.0);
            // E and B have no black key after them
            cursor += if matches!(pitch % 12, 4 | 11) { 1.0 } else { 0.5 };
            right = Some(pos.x);
            pos
        };
        positions.push(pos);
    }
    match (left, right) {
        (Some(left), Some(right)) if right != left => Ok(RelativeKeys { positions, left, right }),
        _ => Err(ProfileError::GenerationFailed(format!(
            "note range {start}..={end} needs both black and white keys"
        ))),
    }
}

fn fit_relative(relative: &RelativeKeys, top_left: Point, bottom_right: Point) -> Vec<Point> {
    let x_scale = (bottom_right.x - top_left.x) / (relative.right - relative.left);
    let y_scale = bottom_right.y - top_left.y;
    let x_translate = top_left.x - relative.left * x_scale;
    let y_translate = top_left.y;
    relative
        .positions
        .iter()
        .map(|p| Point::new(p.x * x_scale + x_translate, p.y * y_scale + y_translate).rounded())
        .collect()
}

/// Pitch -> 1-based key map for a layout played with `variant`.
pub fn generate_pitch_key_map(layout: &KeyLayout, variant: &VariantConfig) -> Result<PitchToKey> {
    let range = parse_range(variant)?;
    match &layout.geometry {
        LayoutGeometry::Grid { .. } | LayoutGeometry::Arbitrary { .. } => {
            let names = variant
                .pitch_key_map_override
                .as_ref()
                .or(layout.pitch_key_map.as_ref())
                .ok_or_else(|| {
                    ProfileError::GenerationFailed(format!("layout {} has no pitch map", layout.display_name))
                })?;
            let mut map = PitchToKey::new();
            for (name, key) in names {
                let pitch = name_to_midi_pitch(name)?;
                if *key == 0 {
                    return Err(ProfileError::GenerationFailed(format!("{name} maps to key 0")));
                }
                if let Some((low, high)) = range {
                    if pitch < low || pitch > high {
                        log::trace!("{name} outside range of variant {}", variant.variant_type);
                        continue;
                    }
                }
                map.insert(pitch, *key);
            }
            Ok(map)
        }
        LayoutGeometry::Professional => {
            let (start, end) = range.ok_or_else(|| {
                ProfileError::GenerationFailed(format!(
                    "variant {} has no note range for a professional layout",
                    variant.variant_type
                ))
            })?;
            Ok((start..=end).zip(1..).collect())
        }
    }
}
