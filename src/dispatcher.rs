//! Live gesture dispatch: MIDI messages in, touch batches out.
//!
//! In discrete mode every note-on taps its key once. In sustained mode a
//! [`SustainTicker`] re-taps every held key each tick until it is released.
//! Batches never exceed [`MAX_GESTURES_PER_BATCH`] and are handed to the
//! player one at a time.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};

use crate::layout::Point;
use crate::midi::{NoteEvent, ShortMessage};
use crate::player::{Gesture, GesturePlayer};
use crate::profile::ProfileSession;

/// Host limit on simultaneous touches.
pub const MAX_GESTURES_PER_BATCH: usize = 10;
pub const DEFAULT_TAP_HOLD_MS: u64 = 50;
pub const DEFAULT_SUSTAIN_HOLD_MS: u64 = 20;
pub const DEFAULT_SUSTAIN_DELAY_MS: u64 = 0;

// ticker poll interval while sustain is off
const IDLE_POLL_MS: u64 = 100;
const MIN_EMPTY_TICK_MS: u64 = 1;

/// 0-based key -> currently held, in the order keys were first seen.
/// Released keys stay as `false` and keep their place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyState {
    keys: Vec<(usize, bool)>,
}

impl KeyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: usize, held: bool) {
        match self.keys.iter_mut().find(|(k, _)| *k == key) {
            Some((_, state)) => *state = held,
            None => self.keys.push((key, held)),
        }
    }

    pub fn get(&self, key: usize) -> Option<bool> {
        self.keys.iter().find(|(k, _)| *k == key).map(|(_, held)| *held)
    }

    /// Held keys in first-seen order.
    pub fn held(&self) -> impl Iterator<Item = usize> + '_ {
        self.keys.iter().filter(|(_, held)| *held).map(|(key, _)| *key)
    }

    pub fn release_all(&mut self) {
        self.keys.iter_mut().for_each(|(_, held)| *held = false);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// One tap per note-on
    Discrete,
    /// Held keys are re-tapped every tick
    Sustained,
}

/// Runtime-tunable dispatch settings, readable from any thread.
pub struct DispatchSettings {
    sustained: AtomicBool,
    tap_hold_ms: AtomicU64,
    sustain_hold_ms: AtomicU64,
    sustain_delay_ms: AtomicU64,
    enforce_min_repeat: AtomicBool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            sustained: AtomicBool::new(false),
            tap_hold_ms: AtomicU64::new(DEFAULT_TAP_HOLD_MS),
            sustain_hold_ms: AtomicU64::new(DEFAULT_SUSTAIN_HOLD_MS),
            sustain_delay_ms: AtomicU64::new(DEFAULT_SUSTAIN_DELAY_MS),
            enforce_min_repeat: AtomicBool::new(false),
        }
    }
}

impl DispatchSettings {
    pub fn mode(&self) -> DispatchMode {
        if self.sustained.load(Ordering::Relaxed) {
            DispatchMode::Sustained
        } else {
            DispatchMode::Discrete
        }
    }

    pub fn set_mode(&self, mode: DispatchMode) {
        self.sustained.store(mode == DispatchMode::Sustained, Ordering::Relaxed);
        log::info!("Dispatch mode: {mode:?}");
    }

    pub fn tap_hold_ms(&self) -> u64 {
        self.tap_hold_ms.load(Ordering::Relaxed)
    }

    pub fn set_tap_hold_ms(&self, ms: u64) {
        self.tap_hold_ms.store(ms, Ordering::Relaxed);
    }

    /// Hold duration of each sustained re-tap
    pub fn sustain_hold_ms(&self) -> u64 {
        self.sustain_hold_ms.load(Ordering::Relaxed)
    }

    pub fn set_sustain_hold_ms(&self, ms: u64) {
        self.sustain_hold_ms.store(ms, Ordering::Relaxed);
    }

    /// Pause between sustained ticks
    pub fn sustain_delay_ms(&self) -> u64 {
        self.sustain_delay_ms.load(Ordering::Relaxed)
    }

    pub fn set_sustain_delay_ms(&self, ms: u64) {
        self.sustain_delay_ms.store(ms, Ordering::Relaxed);
    }

    pub fn enforce_min_repeat(&self) -> bool {
        self.enforce_min_repeat.load(Ordering::Relaxed)
    }

    /// Drop discrete taps that repeat a key faster than the game allows.
    pub fn set_enforce_min_repeat(&self, enabled: bool) {
        self.enforce_min_repeat.store(enabled, Ordering::Relaxed);
    }
}

pub struct Dispatcher {
    profile: Arc<RwLock<ProfileSession>>,
    settings: DispatchSettings,
    key_state: Mutex<KeyState>,
    overrides: RwLock<HashMap<usize, Point>>,
    last_fired: Mutex<HashMap<usize, Instant>>,
    player: Mutex<Box<dyn GesturePlayer>>,
}

impl Dispatcher {
    pub fn new(profile: Arc<RwLock<ProfileSession>>, player: Box<dyn GesturePlayer>) -> Self {
        Self {
            profile,
            settings: DispatchSettings::default(),
            key_state: Mutex::new(KeyState::new()),
            overrides: RwLock::new(HashMap::new()),
            last_fired: Mutex::new(HashMap::new()),
            player: Mutex::new(player),
        }
    }

    pub fn profile(&self) -> &Arc<RwLock<ProfileSession>> {
        &self.profile
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn key_state(&self) -> KeyState {
        self.key_state.lock().clone()
    }

    pub fn held_keys(&self) -> Vec<usize> {
        self.key_state.lock().held().collect()
    }

    /// Mark every key released, e.g. after the input port goes away.
    pub fn release_all(&self) {
        self.key_state.lock().release_all();
    }

    // ---- manual position overrides ----

    /// Use `position` for `key` instead of the generated position.
    pub fn set_position_override(&self, key: usize, position: Point) {
        self.overrides.write().insert(key, position);
    }

    pub fn replace_position_overrides(&self, overrides: impl IntoIterator<Item = (usize, Point)>) {
        *self.overrides.write() = overrides.into_iter().collect();
    }

    pub fn clear_position_overrides(&self) {
        self.overrides.write().clear();
    }

    pub fn position_overrides(&self) -> BTreeMap<usize, Point> {
        self.overrides.read().iter().map(|(k, p)| (*k, *p)).collect()
    }

    // ---- dispatch ----

    /// Apply a batch of raw messages. In discrete mode the keys newly pressed
    /// by this batch are tapped; the emitted gestures are returned.
    pub fn handle_messages<B: AsRef<[u8]>>(&self, messages: &[B]) -> Vec<Gesture> {
        let profile = self.profile.read();
        let mut pressed: Vec<usize> = Vec::new();
        {
            let mut state = self.key_state.lock();
            for raw in messages {
                let Some(msg) = ShortMessage::from_bytes(raw.as_ref()) else {
                    continue;
                };
                let (pitch, on) = match msg.event() {
                    NoteEvent::NoteOn { pitch, .. } => (pitch, true),
                    NoteEvent::NoteOff { pitch } => (pitch, false),
                    NoteEvent::Other => continue,
                };
                let key = match profile.key_for_pitch(pitch) {
                    Ok(Some(key)) => key,
                    Ok(None) => continue,
                    Err(e) => {
                        log::error!("Cannot map pitch {pitch}: {e}");
                        continue;
                    }
                };
                state.set(key, on);
                if on && !pressed.contains(&key) {
                    pressed.push(key);
                }
            }
        }

        if self.settings.mode() != DispatchMode::Discrete || pressed.is_empty() {
            return Vec::new();
        }
        if self.settings.enforce_min_repeat() {
            let interval = Duration::from_millis(profile.min_repeat_interval_ms().unwrap_or(0));
            let now = Instant::now();
            let mut last = self.last_fired.lock();
            pressed.retain(|key| match last.get(key) {
                Some(at) if now.duration_since(*at) < interval => {
                    log::debug!("Key {key} repeated within {interval:?}, skipped");
                    false
                }
                _ => true,
            });
            for key in &pressed {
                last.insert(*key, now);
            }
        }
        pressed.truncate(MAX_GESTURES_PER_BATCH);

        let batch = self.build_batch(&profile, &pressed, self.settings.tap_hold_ms());
        drop(profile);
        self.play(&batch);
        batch
    }

    /// One sustained tick: tap every held key in the order the keys were first pressed.
    pub fn tick(&self) -> Vec<Gesture> {
        if self.settings.mode() != DispatchMode::Sustained {
            return Vec::new();
        }
        let mut held = self.held_keys();
        if held.is_empty() {
            return Vec::new();
        }
        held.truncate(MAX_GESTURES_PER_BATCH);

        let profile = self.profile.read();
        let batch = self.build_batch(&profile, &held, self.settings.sustain_hold_ms());
        drop(profile);
        self.play(&batch);
        batch
    }

    fn build_batch(&self, profile: &ProfileSession, keys: &[usize], hold_ms: u64) -> Vec<Gesture> {
        let overrides = self.overrides.read();
        keys.iter()
            .filter_map(|key| {
                if let Some(position) = overrides.get(key) {
                    return Some(Gesture::tap(*position, hold_ms));
                }
                match profile.key_position(*key) {
                    Ok(position) => Some(Gesture::tap(position, hold_ms)),
                    Err(e) => {
                        log::warn!("Skipping key {key}: {e}");
                        None
                    }
                }
            })
            .collect()
    }

    fn play(&self, batch: &[Gesture]) {
        if batch.is_empty() {
            return;
        }
        let mut player = self.player.lock();
        if let Err(e) = player.execute(batch) {
            log::error!("Gesture batch failed: {e}");
        }
    }

    /// Feed messages from `source` until every sender is dropped. Messages
    /// that queued up while a batch was playing are handled together.
    pub fn run_receiver(&self, source: Receiver<Vec<u8>>) {
        while let Ok(first) = source.recv() {
            let mut pending = vec![first];
            pending.extend(source.try_iter());
            self.handle_messages(&pending);
        }
        self.release_all();
        log::info!("MIDI input closed");
    }
}

/// Background thread driving [`Dispatcher::tick`] while sustain is on.
pub struct SustainTicker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SustainTicker {
    pub fn start(dispatcher: Arc<Dispatcher>) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::spawn(move || {
            loop {
                let wait = match dispatcher.settings().mode() {
                    DispatchMode::Sustained => {
                        let emitted = dispatcher.tick();
                        let delay = dispatcher.settings().sustain_delay_ms();
                        if emitted.is_empty() { delay.max(MIN_EMPTY_TICK_MS) } else { delay }
                    }
                    DispatchMode::Discrete => IDLE_POLL_MS,
                };
                match stop_rx.recv_timeout(Duration::from_millis(wait)) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
            log::debug!("Sustain ticker stopped");
        });
        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stop after the current tick and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // dropping the sender disconnects the channel
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Sustain ticker panicked");
            }
        }
    }
}

impl Drop for SustainTicker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Vec<Gesture>>>>);

    impl GesturePlayer for Recorder {
        fn execute(&mut self, batch: &[Gesture]) -> io::Result<()> {
            self.0.lock().push(batch.to_vec());
            Ok(())
        }
    }

    fn calibrated_sky() -> Arc<RwLock<ProfileSession>> {
        let mut session = ProfileSession::builtin();
        session.select_game("Sky").unwrap();
        session.set_calibration(Point::new(0.0, 0.0), Point::new(400.0, 200.0)).unwrap();
        Arc::new(RwLock::new(session))
    }

    #[test]
    fn note_off_only_updates_state() {
        let recorder = Recorder::default();
        let dispatcher = Dispatcher::new(calibrated_sky(), Box::new(recorder.clone()));
        dispatcher.handle_messages(&[[0x90u8, 60, 100]]);
        let emitted = dispatcher.handle_messages(&[[0x80u8, 60, 0]]);
        assert!(emitted.is_empty());
        assert_eq!(recorder.0.lock().len(), 1);
        // sky C4 is key 11 -> index 10
        assert_eq!(dispatcher.key_state().get(10), Some(false));
    }

    #[test]
    fn sustained_mode_does_not_tap_on_note_on() {
        let recorder = Recorder::default();
        let dispatcher = Dispatcher::new(calibrated_sky(), Box::new(recorder.clone()));
        dispatcher.settings().set_mode(DispatchMode::Sustained);
        assert!(dispatcher.handle_messages(&[[0x90u8, 60, 100]]).is_empty());
        assert_eq!(dispatcher.held_keys(), vec![10]);
        let tick = dispatcher.tick();
        assert_eq!(tick.len(), 1);
        assert_eq!(tick[0].hold_ms, DEFAULT_SUSTAIN_HOLD_MS);
    }

    #[test]
    fn override_wins_over_generated_position() {
        let dispatcher = Dispatcher::new(calibrated_sky(), Box::new(Recorder::default()));
        dispatcher.set_position_override(10, Point::new(7.0, 9.0));
        let emitted = dispatcher.handle_messages(&[[0x90u8, 60, 100]]);
        assert_eq!(emitted, vec![Gesture::tap(Point::new(7.0, 9.0), DEFAULT_TAP_HOLD_MS)]);
    }

    #[test]
    fn min_repeat_drops_fast_retaps() {
        let dispatcher = Dispatcher::new(calibrated_sky(), Box::new(Recorder::default()));
        dispatcher.settings().set_enforce_min_repeat(true);
        assert_eq!(dispatcher.handle_messages(&[[0x90u8, 60, 100]]).len(), 1);
        // Sky enforces 20ms between repeats
        assert!(dispatcher.handle_messages(&[[0x90u8, 60, 100]]).is_empty());
    }

    #[test]
    fn ticker_stops_cleanly() {
        let recorder = Recorder::default();
        let dispatcher = Arc::new(Dispatcher::new(calibrated_sky(), Box::new(recorder.clone())));
        dispatcher.settings().set_mode(DispatchMode::Sustained);
        dispatcher.settings().set_sustain_delay_ms(5);
        dispatcher.handle_messages(&[[0x90u8, 60, 100]]);

        let ticker = SustainTicker::start(dispatcher.clone());
        thread::sleep(Duration::from_millis(100));
        ticker.stop();
        let after_stop = recorder.0.lock().len();
        assert!(after_stop >= 2, "only {after_stop} ticks");
        thread::sleep(Duration::from_millis(30));
        assert_eq!(recorder.0.lock().len(), after_stop);
    }
}
