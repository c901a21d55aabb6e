//! Key layout geometries and their default pitch-to-key tables.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};

use crate::error::{ProfileError, Result};

/// Screen coordinate (or unit-square fraction for relative positions).
///
/// Serialises as a two element array `[x, y]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn rounded(&self) -> Point {
        Point::new(self.x.round(), self.y.round())
    }

    pub fn is_origin(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Point::new(x, y)
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Note name -> 1-based key number.
pub type PitchKeyMap = BTreeMap<String, usize>;

/// Which diagonal corner pair the two calibration points describe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    /// First point is the top-left key, second the bottom-right key
    #[default]
    LeftTopRightBottom,
    /// First point is the bottom-left key, second the top-right key
    LeftBottomRightTop,
}

impl Locator {
    /// Normalise a calibration pair to (top-left, bottom-right).
    pub fn normalize(&self, a: Point, b: Point) -> (Point, Point) {
        match self {
            Locator::LeftTopRightBottom => (a, b),
            Locator::LeftBottomRightTop => (Point::new(a.x, b.y), Point::new(b.x, a.y)),
        }
    }
}

/// How key positions are derived for a layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayoutGeometry {
    /// `row` x `column` evenly spaced keys, numbered from the bottom-left
    Grid { row: usize, column: usize },
    /// Explicit unit-square positions, in key order
    #[serde(rename_all = "camelCase")]
    Arbitrary { relative_positions: Vec<Point> },
    /// Piano-style two row keyboard derived from the variant's note range
    Professional,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyLayout {
    pub display_name: String,
    #[serde(default)]
    pub locator: Locator,
    #[serde(flatten)]
    pub geometry: LayoutGeometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch_key_map: Option<PitchKeyMap>,
}

impl KeyLayout {
    pub fn grid(display_name: &str, row: usize, column: usize, map: PitchKeyMap) -> Self {
        Self {
            display_name: display_name.to_string(),
            locator: Locator::LeftTopRightBottom,
            geometry: LayoutGeometry::Grid { row, column },
            pitch_key_map: Some(map),
        }
    }

    pub fn arbitrary(display_name: &str, relative_positions: Vec<Point>, map: PitchKeyMap) -> Self {
        Self {
            display_name: display_name.to_string(),
            locator: Locator::LeftTopRightBottom,
            geometry: LayoutGeometry::Arbitrary { relative_positions },
            pitch_key_map: Some(map),
        }
    }

    pub fn professional(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            locator: Locator::LeftTopRightBottom,
            geometry: LayoutGeometry::Professional,
            pitch_key_map: None,
        }
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = locator;
        self
    }

    /// Check the per-geometry invariants.
    pub fn validate(&self, key: &str) -> Result<()> {
        match &self.geometry {
            LayoutGeometry::Grid { row, column } if *row == 0 || *column == 0 => Err(
                ProfileError::GenerationFailed(format!("grid layout {key} needs at least one row and column")),
            ),
            LayoutGeometry::Arbitrary { relative_positions } if relative_positions.is_empty() => Err(
                ProfileError::GenerationFailed(format!("arbitrary layout {key} has no key positions")),
            ),
            _ => Ok(()),
        }
    }
}

/// Read-only registry of key layouts, in registration order.
#[derive(Clone, Debug, Default)]
pub struct LayoutCatalog {
    layouts: Vec<(String, KeyLayout)>,
}

impl LayoutCatalog {
    /// Build a catalog from `(key, layout)` pairs, rejecting invalid layouts.
    pub fn new(layouts: Vec<(String, KeyLayout)>) -> Result<Self> {
        for (key, layout) in &layouts {
            layout.validate(key)?;
        }
        Ok(Self { layouts })
    }

    /// Shared handle to the built-in layouts.
    pub fn builtin() -> Arc<LayoutCatalog> {
        BUILTIN_LAYOUTS.clone()
    }

    pub fn get(&self, key: &str) -> Result<&KeyLayout> {
        self.layouts
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, layout)| layout)
            .ok_or_else(|| ProfileError::UnknownLayout(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.layouts.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.layouts.iter().map(|(k, _)| k.as_str())
    }
}

fn pitch_map(entries: &[(&str, usize)]) -> PitchKeyMap {
    entries.iter().map(|(name, key)| (name.to_string(), *key)).collect()
}

// Key numbers start at the bottom-left key, left to right, then upward.
pub(crate) fn generic_3x7_map() -> PitchKeyMap {
    pitch_map(&[
        ("C3", 1), ("D3", 2), ("E3", 3), ("F3", 4), ("G3", 5), ("A3", 6), ("B3", 7),
        ("C4", 8), ("D4", 9), ("E4", 10), ("F4", 11), ("G4", 12), ("A4", 13), ("B4", 14),
        ("C5", 15), ("D5", 16), ("E5", 17), ("F5", 18), ("G5", 19), ("A5", 20), ("B5", 21),
    ])
}

// C4 D4 E4 F4 G4
// A4 B4 C5 D5 E5
// F5 G5 A5 B5 C6
pub(crate) fn sky_3x5_map() -> PitchKeyMap {
    pitch_map(&[
        ("F5", 1), ("G5", 2), ("A5", 3), ("B5", 4), ("C6", 5),
        ("A4", 6), ("B4", 7), ("C5", 8), ("D5", 9), ("E5", 10),
        ("C4", 11), ("D4", 12), ("E4", 13), ("F4", 14), ("G4", 15),
    ])
}

// A4 E5 G5 A5
// C6 D6 E6 G6
pub(crate) fn sky_2x4_map() -> PitchKeyMap {
    pitch_map(&[
        ("C6", 1), ("D6", 2), ("E6", 3), ("G6", 4),
        ("A4", 5), ("E5", 6), ("G5", 7), ("A5", 8),
    ])
}

// C5 C#5 D#5 F5 G5 G#5 A#5
// C4 D4  D#4 F4 G4 A4  A#4
// C3 D3  D#3 F3 G3 A3  A#3
pub(crate) fn genshin_vintage_3x7_map() -> PitchKeyMap {
    pitch_map(&[
        ("C3", 1), ("D3", 2), ("D3#", 3), ("F3", 4), ("G3", 5), ("A3", 6), ("A3#", 7),
        ("C4", 8), ("D4", 9), ("D4#", 10), ("F4", 11), ("G4", 12), ("A4", 13), ("A4#", 14),
        ("C5", 15), ("C5#", 16), ("D5#", 17), ("F5", 18), ("G5", 19), ("G5#", 20), ("A5#", 21),
    ])
}

static BUILTIN_LAYOUTS: LazyLock<Arc<LayoutCatalog>> = LazyLock::new(|| {
    Arc::new(LayoutCatalog {
        layouts: vec![
            ("generic_3x7".to_string(), KeyLayout::grid("3x7", 3, 7, generic_3x7_map())),
            ("sky_3x5".to_string(), KeyLayout::grid("3x5", 3, 5, sky_3x5_map())),
            ("sky_2x4".to_string(), KeyLayout::grid("2x4", 2, 4, sky_2x4_map())),
            ("diy_3x5".to_string(), KeyLayout::grid("3x5 (custom)", 3, 5, sky_3x5_map())),
            ("nshm_professional".to_string(), KeyLayout::professional("Professional")),
        ],
    })
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::name_to_midi_pitch;

    #[test]
    fn builtin_layouts_are_valid() {
        let catalog = LayoutCatalog::builtin();
        for key in catalog.keys() {
            catalog.get(key).unwrap().validate(key).unwrap();
        }
        assert_eq!(
            catalog.keys().collect::<Vec<_>>(),
            vec!["generic_3x7", "sky_3x5", "sky_2x4", "diy_3x5", "nshm_professional"]
        );
    }

    #[test]
    fn builtin_maps_parse_and_fit_their_grids() {
        let catalog = LayoutCatalog::builtin();
        for key in catalog.keys() {
            let layout = catalog.get(key).unwrap();
            let (Some(map), LayoutGeometry::Grid { row, column }) = (&layout.pitch_key_map, &layout.geometry)
            else {
                continue;
            };
            for (name, k) in map {
                name_to_midi_pitch(name).unwrap();
                assert!(*k >= 1 && *k <= row * column, "{key}: {name} -> {k}");
            }
        }
    }

    #[test]
    fn unknown_layout_is_reported() {
        let err = LayoutCatalog::builtin().get("piano_88").unwrap_err();
        assert_eq!(err, ProfileError::UnknownLayout("piano_88".into()));
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        let empty_grid = KeyLayout::grid("0x3", 0, 3, PitchKeyMap::new());
        assert!(LayoutCatalog::new(vec![("bad".into(), empty_grid)]).is_err());

        let no_points = KeyLayout::arbitrary("none", vec![], PitchKeyMap::new());
        assert!(LayoutCatalog::new(vec![("bad".into(), no_points)]).is_err());
    }

    #[test]
    fn locator_normalizes_to_top_left_bottom_right() {
        let a = Point::new(10.0, 200.0);
        let b = Point::new(300.0, 20.0);
        let (tl, br) = Locator::LeftBottomRightTop.normalize(a, b);
        assert_eq!(tl, Point::new(10.0, 20.0));
        assert_eq!(br, Point::new(300.0, 200.0));
    }

    #[test]
    fn layout_serializes_with_type_tag() {
        let layout = KeyLayout::grid("2x2", 2, 2, pitch_map(&[("C4", 1)]));
        let json = serde_json::to_value(&layout).unwrap();
        assert_eq!(json["type"], "grid");
        assert_eq!(json["row"], 2);
        assert_eq!(json["pitchKeyMap"]["C4"], 1);
        let back: KeyLayout = serde_json::from_value(json).unwrap();
        assert_eq!(back, layout);
    }
}
