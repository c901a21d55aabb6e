//! MIDI short-message decoding and the live input port.

use crossbeam_channel::Sender;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};

use crate::error::MidiError;
use crate::pitch::Pitch;

pub const NOTE_OFF: u8 = 0x8;
pub const NOTE_ON: u8 = 0x9;

const CLIENT_NAME: &str = "miditotouch input";

/// A channel message split into its status nibbles and two data bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShortMessage {
    pub command: u8,
    pub channel: u8,
    pub data1: u8,
    pub data2: u8,
}

/// What the dispatcher cares about in a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoteEvent {
    NoteOn { pitch: Pitch, velocity: u8 },
    /// Explicit note-off, or note-on with velocity 0
    NoteOff { pitch: Pitch },
    Other,
}

impl ShortMessage {
    pub fn decode(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            command: status >> 4,
            channel: status & 0x0F,
            data1,
            data2,
        }
    }

    /// Decode the first three bytes of a buffer. Missing data bytes read as 0.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&status, rest) = bytes.split_first()?;
        let data1 = rest.first().copied().unwrap_or(0);
        let data2 = rest.get(1).copied().unwrap_or(0);
        Some(Self::decode(status, data1, data2))
    }

    pub fn event(&self) -> NoteEvent {
        match self.command {
            NOTE_ON if self.data2 > 0 => NoteEvent::NoteOn {
                pitch: self.data1,
                velocity: self.data2,
            },
            NOTE_ON | NOTE_OFF => NoteEvent::NoteOff { pitch: self.data1 },
            _ => NoteEvent::Other,
        }
    }
}

fn new_input() -> Result<MidiInput, MidiError> {
    let mut input = MidiInput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;
    input.ignore(Ignore::All);
    Ok(input)
}

fn named_ports(input: &MidiInput) -> Vec<(String, MidiInputPort)> {
    input
        .ports()
        .into_iter()
        .map(|port| {
            let name = input.port_name(&port).unwrap_or_else(|_| "Unknown".to_string());
            (name, port)
        })
        .collect()
}

/// Names of the available input ports.
pub fn list_ports() -> Result<Vec<String>, MidiError> {
    let input = new_input()?;
    Ok(named_ports(&input).into_iter().map(|(name, _)| name).collect())
}

/// An open input port forwarding every raw message into a channel.
///
/// The port stays connected until this value is dropped.
pub struct MidiSource {
    port_name: String,
    _connection: MidiInputConnection<Sender<Vec<u8>>>,
}

impl MidiSource {
    /// Connect to the first port whose name contains `query`, or the first
    /// port at all when `query` is `None`.
    pub fn connect(query: Option<&str>, sink: Sender<Vec<u8>>) -> Result<Self, MidiError> {
        let input = new_input()?;
        let ports = named_ports(&input);
        if ports.is_empty() {
            return Err(MidiError::NoPorts);
        }
        let (port_name, port) = match query {
            Some(q) => ports
                .into_iter()
                .find(|(name, _)| name == q || name.contains(q))
                .ok_or_else(|| MidiError::PortNotFound(q.to_string()))?,
            None => ports.into_iter().next().ok_or(MidiError::NoPorts)?,
        };

        let connection = input
            .connect(
                &port,
                "miditotouch-in",
                move |_stamp, message, sink| {
                    if sink.send(message.to_vec()).is_err() {
                        log::debug!("MIDI receiver gone, dropping message");
                    }
                },
                sink,
            )
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        log::info!("Connected to MIDI port {port_name}");
        Ok(Self {
            port_name,
            _connection: connection,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}
