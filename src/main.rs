use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use parking_lot::RwLock;

use miditotouch::config::{self, JsonFileStore, SustainConfig};
use miditotouch::dispatcher::{Dispatcher, SustainTicker};
use miditotouch::layout::Point;
use miditotouch::midi::{self, MidiSource};
use miditotouch::pitch::midi_pitch_to_name;
use miditotouch::player::{GesturePlayer, LogPlayer};
use miditotouch::profile::ProfileSession;

/// Play rhythm-game instruments on a touchscreen from a MIDI keyboard.
#[derive(Parser, Debug)]
#[command(name = "miditotouch")]
#[command(about = "MIDI keyboard to on-screen instrument taps")]
struct Args {
    /// List MIDI input ports and exit
    #[arg(long)]
    list_ports: bool,

    /// List configured games, layouts and variants and exit
    #[arg(long)]
    list_games: bool,

    /// MIDI input port name (or part of it); first port when omitted
    #[arg(long)]
    port: Option<String>,

    /// Game to play
    #[arg(long)]
    game: Option<String>,

    /// Key layout of the game
    #[arg(long)]
    layout: Option<String>,

    /// Instrument variant of the game
    #[arg(long)]
    variant: Option<String>,

    /// Foreground app package name, used to detect the game
    #[arg(long)]
    package: Option<String>,

    /// Restore the selected game's built-in settings (drops its calibration)
    #[arg(long)]
    reset_game: bool,

    /// Calibration points of the layout's two corner keys
    #[arg(long, num_args = 4, value_names = ["X1", "Y1", "X2", "Y2"], allow_negative_numbers = true)]
    calibrate: Option<Vec<f64>>,

    /// Pin one grid key (row counted from the top, both 0-based) to a screen position
    #[arg(long, num_args = 4, value_names = ["ROW", "COL", "X", "Y"], allow_negative_numbers = true)]
    set_key: Option<Vec<f64>>,

    /// Forget pinned key positions of the current layout
    #[arg(long)]
    clear_keys: bool,

    /// Re-tap held keys until released
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    sustain: Option<bool>,

    /// Hold time of each sustained tap (ms)
    #[arg(long)]
    hold_ms: Option<u64>,

    /// Pause between sustained taps (ms)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Hold time of a single tap (ms)
    #[arg(long)]
    tap_ms: Option<u64>,

    /// Skip taps that repeat a key faster than the game registers
    #[arg(long)]
    enforce_repeat_interval: bool,

    /// Touchscreen size
    #[arg(long, value_parser = parse_screen, default_value = "1920x1080")]
    screen: (u32, u32),

    /// Settings file (default: user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print generated key positions and exit
    #[arg(long)]
    show_positions: bool,

    /// Log gestures instead of touching the screen
    #[arg(long)]
    dry_run: bool,
}

fn parse_screen(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s}"))?;
    let w = w.trim().parse().map_err(|e| format!("Invalid width: {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("Invalid height: {e}"))?;
    Ok((w, h))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_ports {
        for name in midi::list_ports()? {
            println!("{name}");
        }
        return Ok(());
    }

    let path = match &args.config {
        Some(path) => path.clone(),
        None => JsonFileStore::default_path()?,
    };
    let mut store = JsonFileStore::open(&path).with_context(|| format!("reading {}", path.display()))?;
    let mut session = config::restore_session(&mut store, args.package.as_deref())?;

    if args.list_games {
        print_games(&session);
        return Ok(());
    }

    if apply_selection(&args, &mut session)? {
        config::save_catalog(&mut store, &session)?;
    }
    if let Some(points) = &args.calibrate {
        session.set_calibration(Point::new(points[0], points[1]), Point::new(points[2], points[3]))?;
        config::save_catalog(&mut store, &session)?;
    }
    config::save_selection(&mut store, &session)?;
    let game_type = current_game_type(&session)?;

    let layout_key = session.current_layout_key().unwrap_or_default().to_string();
    let mut overrides = config::load_position_overrides(&store, &layout_key);
    if args.clear_keys {
        overrides.clear();
        config::save_position_overrides(&mut store, &layout_key, &overrides)?;
    }
    if let Some(cell) = &args.set_key {
        let index = session.key_index_at(grid_coordinate(cell[0], "ROW")?, grid_coordinate(cell[1], "COL")?)?;
        overrides.insert(index, Point::new(cell[2], cell[3]));
        config::save_position_overrides(&mut store, &layout_key, &overrides)?;
    }

    let mut sustain = SustainConfig::load(&store);
    let saved_sustain = sustain;
    if let Some(enabled) = args.sustain {
        sustain.enabled = enabled;
    }
    if let Some(ms) = args.hold_ms {
        sustain.hold_ms = ms;
    }
    if let Some(ms) = args.delay_ms {
        sustain.delay_ms = ms;
    }
    if sustain != saved_sustain {
        sustain.save(&mut store)?;
    }

    println!(
        "Game: {} | Layout: {} | Variant: {}",
        game_type,
        session.layout_display_name().unwrap_or_default(),
        session.variant_display_name().unwrap_or_default()
    );

    if args.show_positions {
        show_positions(&session, &overrides)?;
        return Ok(());
    }
    if let Some(warning) = spacing_warning(&session, !overrides.is_empty()) {
        log::warn!("{warning}");
    }

    let player = make_player(&args)?;
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(RwLock::new(session)), player));
    dispatcher.replace_position_overrides(overrides);
    sustain.apply(dispatcher.settings());
    if let Some(ms) = args.tap_ms {
        dispatcher.settings().set_tap_hold_ms(ms);
    }
    dispatcher.settings().set_enforce_min_repeat(args.enforce_repeat_interval);

    let ticker = SustainTicker::start(dispatcher.clone());
    let (tx, rx) = crossbeam_channel::unbounded();
    let source = MidiSource::connect(args.port.as_deref(), tx)?;
    println!("Listening on {} (Ctrl-C to quit)", source.port_name());

    dispatcher.run_receiver(rx);
    ticker.stop();
    Ok(())
}

/// Sanity check of the key layout before playing. Never fatal: pinned keys
/// stand in for an uncalibrated layout.
fn spacing_warning(session: &ProfileSession, has_pinned_keys: bool) -> Option<String> {
    match session.min_key_distance() {
        Ok(Some(min)) if min < 1.0 => {
            Some(format!("Keys overlap (min distance {min}); check the calibration points"))
        }
        Ok(_) => None,
        Err(e) if has_pinned_keys => {
            log::info!("Using pinned keys only: {e}");
            None
        }
        Err(e) => Some(format!("No key positions yet: {e}")),
    }
}

/// A 0-based grid row or column given on the command line.
fn grid_coordinate(value: f64, name: &str) -> Result<usize> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        bail!("{name} must be a non-negative whole number, got {value}");
    }
    Ok(value as usize)
}

fn current_game_type(session: &ProfileSession) -> Result<String> {
    match session.current_game() {
        Some(game) => Ok(game.game_type.clone()),
        None => bail!(
            "No game selected; pass --game with one of: {}",
            session.games().game_types().join(", ")
        ),
    }
}

/// Reset (when asked) and then select; returns whether a game was reset.
fn apply_selection(args: &Args, session: &mut ProfileSession) -> Result<bool> {
    if args.reset_game {
        let game_type = match &args.game {
            Some(game) => game.clone(),
            None => current_game_type(session)?,
        };
        session.reset_game(&game_type)?;
    }
    if let Some(game) = &args.game {
        if session.current_game().map(|g| g.game_type.as_str()) != Some(game.as_str()) {
            session.select_game(game)?;
        }
    }
    if let Some(layout) = &args.layout {
        session.select_layout(layout)?;
    }
    if let Some(variant) = &args.variant {
        session.select_variant(variant)?;
    }
    Ok(args.reset_game)
}

fn print_games(session: &ProfileSession) {
    for game in session.games().games() {
        println!("{} ({})", game.game_type, game.game_name);
        for layout in &game.available_layout_types {
            let name = session
                .layouts()
                .get(layout)
                .map(|l| l.display_name.clone())
                .unwrap_or_default();
            println!("  layout  {layout}: {name}");
        }
        for variant in &game.variants {
            println!("  variant {}: {}", variant.variant_type, variant.variant_name);
        }
    }
}

fn show_positions(session: &ProfileSession, overrides: &std::collections::BTreeMap<usize, Point>) -> Result<()> {
    let (positions, generated) = match session.all_key_positions() {
        Ok(positions) => (positions, true),
        Err(e) if !overrides.is_empty() => {
            log::warn!("{e}; showing pinned keys only");
            let count = overrides.keys().max().map_or(0, |max| max + 1);
            (vec![Point::ORIGIN; count], false)
        }
        Err(e) => return Err(e.into()),
    };
    let mut names: Vec<Vec<String>> = vec![Vec::new(); positions.len()];
    for pitch in 0..=127u8 {
        if let Some(key) = session.key_for_pitch(pitch)? {
            if let Some(slot) = names.get_mut(key) {
                slot.push(midi_pitch_to_name(pitch));
            }
        }
    }
    for (index, position) in positions.iter().enumerate() {
        let position = match overrides.get(&index) {
            Some(pinned) => pinned,
            None if generated => position,
            None => {
                println!("{index:3}: (unset) {}", names[index].join(" "));
                continue;
            }
        };
        println!("{index:3}: ({}, {}) {}", position.x, position.y, names[index].join(" "));
    }
    if let Some((low, high)) = session.note_range()? {
        println!("Notes {} - {}", midi_pitch_to_name(low), midi_pitch_to_name(high));
    }
    if let Ok(Some(min)) = session.min_key_distance() {
        println!("Minimum key distance: {min:.1}");
    }
    Ok(())
}

fn make_player(args: &Args) -> Result<Box<dyn GesturePlayer>> {
    if args.dry_run {
        return Ok(Box::new(LogPlayer));
    }
    #[cfg(target_os = "linux")]
    {
        let (width, height) = args.screen;
        let player = miditotouch::player::uinput::TouchPlayer::new(width, height)
            .context("creating virtual touchscreen (needs write access to /dev/uinput)")?;
        Ok(Box::new(player))
    }
    #[cfg(not(target_os = "linux"))]
    {
        log::warn!("Touch output needs Linux uinput; logging gestures instead");
        Ok(Box::new(LogPlayer))
    }
}
