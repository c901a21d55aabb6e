use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;

use miditotouch::layout::PitchKeyMap;
use miditotouch::{GameCatalog, GameConfig, Point, ProfileError, ProfileSession, VariantConfig};

fn session_with(game: GameConfig) -> ProfileSession {
    let mut games = GameCatalog::builtin();
    let game_type = game.game_type.clone();
    games.upsert(game).unwrap();
    let mut session = ProfileSession::new(games);
    session.select_game(&game_type).unwrap();
    session
}

fn solo_game() -> GameConfig {
    let solo: PitchKeyMap = [("C4".to_string(), 1)].into_iter().collect();
    GameConfig::new(
        "Test",
        &["generic_3x7"],
        vec![
            VariantConfig::new("plain", "Plain"),
            VariantConfig::new("solo", "Solo").with_pitch_key_map(solo),
            VariantConfig::new("narrow", "Narrow").with_note_range("C4", "D4"),
        ],
    )
}

#[test]
fn grid_positions_from_calibration() {
    let mut session = ProfileSession::builtin();
    session.select_game("Sky").unwrap();
    session.select_layout("sky_3x5").unwrap();
    session
        .set_calibration(Point::new(0.0, 0.0), Point::new(100.0, 100.0))
        .unwrap();

    let positions = session.all_key_positions().unwrap();
    assert_eq!(positions.len(), 15);
    assert_eq!(session.key_position(0).unwrap(), Point::new(0.0, 100.0));
    assert_eq!(session.key_position(4).unwrap(), Point::new(100.0, 100.0));
    assert_eq!(session.key_position(10).unwrap(), Point::new(0.0, 0.0));
    assert!(matches!(
        session.key_position(15),
        Err(ProfileError::KeyOutOfRange { index: 15, count: 15 })
    ));
}

#[test]
fn uncalibrated_layout_has_no_positions() {
    let mut session = ProfileSession::builtin();
    assert!(matches!(session.key_position(0), Err(ProfileError::PositionUnavailable(_))));
    session.select_game("Genshin").unwrap();
    assert!(matches!(session.key_position(0), Err(ProfileError::PositionUnavailable(_))));
    // lookups by pitch still work without calibration
    assert_eq!(session.key_for_pitch(60).unwrap(), Some(7));
}

#[test]
fn variant_switch_regenerates_pitch_map() {
    let mut session = session_with(solo_game());
    assert_eq!(session.key_for_pitch(60).unwrap(), Some(7));

    session.select_variant("solo").unwrap();
    assert_eq!(session.key_for_pitch(60).unwrap(), Some(0));
    assert_eq!(session.key_for_pitch(62).unwrap(), None);

    session.select_variant("plain").unwrap();
    assert_eq!(session.key_for_pitch(60).unwrap(), Some(7));
    assert_eq!(session.key_for_pitch(62).unwrap(), Some(8));
}

#[test]
fn pitch_outside_note_range_is_not_found() {
    let mut session = session_with(solo_game());
    session.select_variant("narrow").unwrap();
    // E4 is in the layout map but outside C4..D4
    assert_eq!(session.key_for_pitch(64).unwrap(), None);
    assert_eq!(session.key_for_pitch(62).unwrap(), Some(8));
    assert_eq!(session.note_range().unwrap(), Some((60, 62)));
    assert_eq!(session.key_range().unwrap(), Some((8, 9)));
}

#[test]
fn unmapped_pitch_is_not_an_error() {
    let mut session = ProfileSession::builtin();
    session.select_game("Sky").unwrap();
    assert_eq!(session.key_for_pitch(0).unwrap(), None);
    assert_eq!(session.key_for_pitch(127).unwrap(), None);
    assert_eq!(session.note_range().unwrap(), Some((60, 84)));
}

#[test]
fn degenerate_calibration_has_zero_distance() {
    let mut session = ProfileSession::builtin();
    session.select_game("Genshin").unwrap();
    session
        .set_calibration(Point::new(50.0, 50.0), Point::new(50.0, 50.0))
        .unwrap();
    assert_eq!(session.min_key_distance().unwrap(), Some(0.0));
}

#[test]
fn min_distance_matches_grid_spacing() {
    let mut session = ProfileSession::builtin();
    session.select_game("Genshin").unwrap();
    session
        .set_calibration(Point::new(100.0, 100.0), Point::new(700.0, 300.0))
        .unwrap();
    // 6 column gaps over 600px, 2 row gaps over 200px
    assert_eq!(session.min_key_distance().unwrap(), Some(100.0));

    let closest = session.physically_closest_keys(0).unwrap();
    assert_eq!(closest.len(), 20);
    assert_eq!(closest[0], (1, 100.0));
    assert_eq!(closest[1], (7, 100.0));
    assert!(closest.windows(2).all(|w| w[0].1 <= w[1].1));
}

#[test]
fn professional_layout_follows_variant_range() {
    let mut session = ProfileSession::builtin();
    session.select_game("Justice Mobile").unwrap();
    session
        .set_calibration(Point::new(100.0, 500.0), Point::new(1000.0, 700.0))
        .unwrap();

    // C3..=B5
    let positions = session.all_key_positions().unwrap();
    assert_eq!(positions.len(), 83 - 48 + 1);
    assert_eq!(positions[1], Point::new(100.0, 500.0));
    assert_eq!(positions[35], Point::new(1000.0, 700.0));
    assert_eq!(session.key_for_pitch(48).unwrap(), Some(0));
    assert_eq!(session.key_for_pitch(83).unwrap(), Some(35));
    assert_eq!(session.key_for_pitch(84).unwrap(), None);

    session.select_variant("two_octaves").unwrap();
    assert_eq!(session.all_key_positions().unwrap().len(), 83 - 60 + 1);
    assert_eq!(session.key_for_pitch(60).unwrap(), Some(0));
}

#[test]
fn professional_layout_without_range_fails() {
    let game = GameConfig::new("Pro", &["nshm_professional"], vec![VariantConfig::default()]);
    let mut session = session_with(game);
    session
        .set_calibration(Point::new(10.0, 10.0), Point::new(500.0, 90.0))
        .unwrap();
    assert!(matches!(
        session.all_key_positions(),
        Err(ProfileError::GenerationFailed(_))
    ));
    assert!(matches!(session.key_for_pitch(60), Err(ProfileError::GenerationFailed(_))));
}

#[test]
fn calibration_is_kept_per_layout() {
    let mut session = ProfileSession::builtin();
    session.select_game("Sky").unwrap();
    session
        .set_calibration(Point::new(0.0, 0.0), Point::new(100.0, 100.0))
        .unwrap();
    assert_eq!(session.key_position(0).unwrap(), Point::new(0.0, 100.0));

    session.select_layout("sky_2x4").unwrap();
    assert_eq!(session.calibration(), Some((Point::ORIGIN, Point::ORIGIN)));
    assert!(matches!(session.key_position(0), Err(ProfileError::PositionUnavailable(_))));

    session.select_layout("sky_3x5").unwrap();
    session
        .set_calibration(Point::new(0.0, 0.0), Point::new(200.0, 200.0))
        .unwrap();
    assert_eq!(session.key_position(0).unwrap(), Point::new(0.0, 200.0));
}

#[test]
fn rejected_selection_leaves_session_unchanged() {
    let mut session = ProfileSession::builtin();
    session.select_game("Sky").unwrap();
    session.select_layout("sky_2x4").unwrap();
    let before = session.identifier_triple();

    assert!(matches!(
        session.select_layout("generic_3x7"),
        Err(ProfileError::InvalidSelection { kind: "layout", .. })
    ));
    assert!(matches!(
        session.select_variant("Vintage Lyre"),
        Err(ProfileError::InvalidSelection { kind: "variant", .. })
    ));
    assert!(matches!(session.select_game("Piano Tiles"), Err(ProfileError::UnknownGame(_))));
    assert_eq!(session.identifier_triple(), before);
}

#[test]
fn selecting_a_game_resets_layout_and_variant() {
    let mut session = ProfileSession::builtin();
    session.select_game("Genshin").unwrap();
    session.select_variant("Vintage Lyre").unwrap();
    assert_eq!(session.key_for_pitch(63).unwrap(), Some(9));

    session.select_game("Sky").unwrap();
    session.select_game("Genshin").unwrap();
    assert_eq!(session.identifier_triple(), "Genshin-generic_3x7-Windsong Lyre");
    assert_eq!(session.key_for_pitch(63).unwrap(), None);
}

#[test]
fn package_detection_keeps_matching_game() {
    let mut session = ProfileSession::builtin();
    session.select_game("Genshin").unwrap();
    session.select_variant("Vintage Lyre").unwrap();

    // matches Genshin's own hints, selection untouched
    assert!(session.select_game_by_package("com.miHoYo.yuanshen"));
    assert_eq!(session.current_variant().unwrap().variant_type, "Vintage Lyre");

    assert!(session.select_game_by_package("com.netease.dwrg"));
    assert_eq!(session.current_game().unwrap().game_type, "Identity V");

    assert!(!session.select_game_by_package("com.example.calculator"));
    assert_eq!(session.current_game().unwrap().game_type, "Identity V");
}

#[test]
fn display_helpers() {
    let mut session = ProfileSession::builtin();
    assert_eq!(session.identifier_triple(), "--");
    assert_eq!(session.variant_display_name(), None);

    session.select_game("Sky").unwrap();
    assert_eq!(session.variant_display_name().as_deref(), Some(""));
    assert_eq!(session.layout_display_name().as_deref(), Some("3x5"));

    session.select_game("Justice Mobile").unwrap();
    assert_eq!(session.variant_display_name().as_deref(), Some("Piano (C3-B5)"));
    assert_eq!(session.layout_display_name().as_deref(), Some("Professional"));
    assert_eq!(session.min_repeat_interval_ms(), Some(20));
}

#[test]
fn reset_game_discards_calibration() {
    let mut session = ProfileSession::builtin();
    session.select_game("Sky").unwrap();
    session
        .set_calibration(Point::new(0.0, 0.0), Point::new(100.0, 100.0))
        .unwrap();
    session.reset_game("Sky").unwrap();
    assert!(matches!(session.key_position(0), Err(ProfileError::PositionUnavailable(_))));
}

#[test]
fn readers_never_see_a_stale_map() {
    let session = Arc::new(RwLock::new(session_with(solo_game())));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let session = session.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let guard = session.read();
                    let expected = match guard.current_variant().map(|v| v.variant_type.as_str()) {
                        Some("solo") => Some(0),
                        _ => Some(7),
                    };
                    assert_eq!(guard.key_for_pitch(60).unwrap(), expected);
                }
            })
        })
        .collect();

    for i in 0..200 {
        let variant = if i % 2 == 0 { "solo" } else { "plain" };
        session.write().select_variant(variant).unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn replacing_the_catalog_keeps_surviving_selection() {
    let mut session = ProfileSession::builtin();
    session.select_game("Sky").unwrap();
    session.select_layout("sky_2x4").unwrap();

    let mut games = GameCatalog::builtin();
    games.upsert(solo_game()).unwrap();
    session.replace_catalog(games);
    assert_eq!(session.identifier_triple(), "Sky-sky_2x4-default");

    session.replace_catalog(GameCatalog::new(vec![solo_game()]).unwrap());
    assert!(session.current_game().is_none());
    assert_eq!(session.identifier_triple(), "--");
}
