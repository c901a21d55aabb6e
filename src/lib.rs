//! Turns live MIDI notes into touch gestures on calibrated on-screen
//! instrument keys of rhythm-game minigames.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod game;
pub mod layout;
pub mod midi;
pub mod pitch;
pub mod player;
pub mod profile;

pub use dispatcher::{DispatchMode, Dispatcher, SustainTicker};
pub use error::{ConfigError, MidiError, ProfileError, Result};
pub use game::{GameCatalog, GameConfig, SustainImplementation, VariantConfig};
pub use layout::{KeyLayout, LayoutCatalog, LayoutGeometry, Locator, Point};
pub use player::{Gesture, GesturePlayer};
pub use profile::ProfileSession;
