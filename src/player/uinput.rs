//! Virtual multitouch screen (type B protocol) backed by `/dev/uinput`.
//!
//! Each gesture in a batch gets its own slot; the batch is played as a
//! press/release timeline and `execute` returns when the last finger lifts.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use evdev::uinput::VirtualDevice;
use evdev::{
    AbsInfo, AbsoluteAxisCode, AttributeSet, EventType, InputEvent, KeyCode, PropType, UinputAbsSetup,
};

use super::{Gesture, GesturePlayer};

/// Concurrent contacts the device advertises.
pub const MAX_SLOTS: usize = 10;

const MAX_TRACKING_ID: i32 = 0xFFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Edge {
    // releases sort first so a slot is free before it is reused at the same instant
    Up,
    Down,
}

pub struct TouchPlayer {
    device: VirtualDevice,
    width: i32,
    height: i32,
    next_tracking_id: i32,
}

impl TouchPlayer {
    /// Create the virtual device. Needs write access to `/dev/uinput`.
    pub fn new(width: u32, height: u32) -> io::Result<Self> {
        let width = width.max(1) as i32;
        let height = height.max(1) as i32;

        let mut keys = AttributeSet::<KeyCode>::new();
        keys.insert(KeyCode::BTN_TOUCH);

        let mut props = AttributeSet::<PropType>::new();
        props.insert(PropType::DIRECT);

        let slot = UinputAbsSetup::new(
            AbsoluteAxisCode::ABS_MT_SLOT,
            AbsInfo::new(0, 0, MAX_SLOTS as i32 - 1, 0, 0, 0),
        );
        let tracking = UinputAbsSetup::new(
            AbsoluteAxisCode::ABS_MT_TRACKING_ID,
            AbsInfo::new(0, 0, MAX_TRACKING_ID, 0, 0, 0),
        );
        let pos_x = UinputAbsSetup::new(
            AbsoluteAxisCode::ABS_MT_POSITION_X,
            AbsInfo::new(0, 0, width - 1, 0, 0, 0),
        );
        let pos_y = UinputAbsSetup::new(
            AbsoluteAxisCode::ABS_MT_POSITION_Y,
            AbsInfo::new(0, 0, height - 1, 0, 0, 0),
        );

        let device = VirtualDevice::builder()?
            .name("miditotouch virtual touchscreen")
            .with_keys(&keys)?
            .with_absolute_axis(&slot)?
            .with_absolute_axis(&tracking)?
            .with_absolute_axis(&pos_x)?
            .with_absolute_axis(&pos_y)?
            .with_properties(&props)?
            .build()?;

        log::info!("Created virtual touchscreen {width}x{height}");
        Ok(Self {
            device,
            width,
            height,
            next_tracking_id: 0,
        })
    }

    fn tracking_id(&mut self) -> i32 {
        let id = self.next_tracking_id;
        self.next_tracking_id = (self.next_tracking_id + 1) % MAX_TRACKING_ID;
        id
    }

    fn abs(code: AbsoluteAxisCode, value: i32) -> InputEvent {
        InputEvent::new(EventType::ABSOLUTE.0, code.0, value)
    }

    fn touch(value: i32) -> InputEvent {
        InputEvent::new(EventType::KEY.0, KeyCode::BTN_TOUCH.code(), value)
    }
}

impl GesturePlayer for TouchPlayer {
    fn execute(&mut self, batch: &[Gesture]) -> io::Result<()> {
        let batch = &batch[..batch.len().min(MAX_SLOTS)];

        let mut timeline: Vec<(u64, Edge, usize)> = Vec::with_capacity(batch.len() * 2);
        for (slot, g) in batch.iter().enumerate() {
            timeline.push((g.start_delay_ms, Edge::Down, slot));
            timeline.push((g.start_delay_ms + g.hold_ms.max(1), Edge::Up, slot));
        }
        timeline.sort();

        let start = Instant::now();
        let mut active = 0usize;
        let mut i = 0;
        while i < timeline.len() {
            let at = timeline[i].0;
            let elapsed = start.elapsed();
            let due = Duration::from_millis(at);
            if due > elapsed {
                thread::sleep(due - elapsed);
            }

            let was_active = active;
            let mut events = Vec::new();
            while i < timeline.len() && timeline[i].0 == at {
                let (_, edge, slot) = timeline[i];
                events.push(Self::abs(AbsoluteAxisCode::ABS_MT_SLOT, slot as i32));
                match edge {
                    Edge::Down => {
                        let p = batch[slot].position;
                        let x = (p.x.round() as i32).clamp(0, self.width - 1);
                        let y = (p.y.round() as i32).clamp(0, self.height - 1);
                        let id = self.tracking_id();
                        events.push(Self::abs(AbsoluteAxisCode::ABS_MT_TRACKING_ID, id));
                        events.push(Self::abs(AbsoluteAxisCode::ABS_MT_POSITION_X, x));
                        events.push(Self::abs(AbsoluteAxisCode::ABS_MT_POSITION_Y, y));
                        active += 1;
                    }
                    Edge::Up => {
                        events.push(Self::abs(AbsoluteAxisCode::ABS_MT_TRACKING_ID, -1));
                        active -= 1;
                    }
                }
                i += 1;
            }
            if was_active == 0 && active > 0 {
                events.push(Self::touch(1));
            } else if was_active > 0 && active == 0 {
                events.push(Self::touch(0));
            }
            // emit appends SYN_REPORT
            self.device.emit(&events)?;
        }
        Ok(())
    }
}
