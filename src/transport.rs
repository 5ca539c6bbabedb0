//! MIDI transport for the LPD8
//!
//! The session only needs three capabilities from the wire: send a SysEx
//! payload, send a note on/off, and drain whatever arrived since the last
//! call. [`Transport`] captures that; [`MidirTransport`] implements it on top
//! of `midir`, and [`PortFactory`] hands out ports so that two sessions never
//! open the same controller.

use std::collections::HashSet;
use std::sync::Arc;

use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection, MidiOutputPort};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::midi::{format_hex, MidiMessage};

/// Inbound message handed to the session
pub type TransportEvent = MidiMessage;

/// Velocity used for pad LED notes
pub const LIGHT_VELOCITY: u8 = 64;

const EVENT_QUEUE_SIZE: usize = 1000;

/// Wire capabilities the device session depends on
pub trait Transport {
    /// Send a SysEx payload (framing bytes are added by the transport)
    fn send_sysex(&mut self, data: &[u8]) -> Result<()>;

    /// Send a note on or off
    fn send_note(&mut self, note: u8, on: bool) -> Result<()>;

    /// Everything received since the last call; never blocks
    fn drain_pending(&mut self) -> Vec<TransportEvent>;
}

/// Port names held by live transports, per direction
#[derive(Debug, Default)]
struct Claims {
    inputs: HashSet<String>,
    outputs: HashSet<String>,
}

type ClaimSet = Arc<Mutex<Claims>>;

/// Releases a claimed input/output pair when the transport is dropped
#[derive(Debug)]
struct PortClaim {
    input: String,
    output: String,
    claims: ClaimSet,
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        let mut claims = self.claims.lock();
        claims.inputs.remove(&self.input);
        claims.outputs.remove(&self.output);
        debug!("Released ports '{}' / '{}'", self.input, self.output);
    }
}

/// Information about a MIDI port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub index: usize,
    pub name: String,
}

/// Pick the first input/output pair matching `pattern` with neither side
/// claimed, as indices into `inputs` and `outputs`
///
/// An input is paired with the output of the same name, or failing that with
/// the output at the same position among the matching outputs.
fn select_pair(pattern: &str, inputs: &[String], outputs: &[String], claims: &Claims) -> Option<(usize, usize)> {
    let pattern = pattern.to_lowercase();
    let matching = |names: &[String]| -> Vec<usize> {
        names
            .iter()
            .enumerate()
            .filter(|(_, name)| name.to_lowercase().contains(&pattern))
            .map(|(i, _)| i)
            .collect()
    };
    let matching_outputs = matching(outputs);

    for (position, input) in matching(inputs).into_iter().enumerate() {
        let name = &inputs[input];
        if claims.inputs.contains(name) {
            debug!("Port '{}' already in use", name);
            continue;
        }
        let output = matching_outputs
            .iter()
            .copied()
            .find(|&o| outputs[o] == *name)
            .or_else(|| matching_outputs.get(position).copied());
        match output {
            Some(output) if !claims.outputs.contains(&outputs[output]) => return Some((input, output)),
            Some(output) => debug!("Output '{}' for '{}' already in use", outputs[output], name),
            None => debug!("No output port paired with '{}'", name),
        }
    }
    None
}

/// Opens LPD8 ports, never handing the same one out twice
#[derive(Debug, Clone, Default)]
pub struct PortFactory {
    claims: ClaimSet,
}

impl PortFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a port name is held by a live transport, in either direction
    pub fn is_claimed(&self, name: &str) -> bool {
        let claims = self.claims.lock();
        claims.inputs.contains(name) || claims.outputs.contains(name)
    }

    /// Select and reserve a free pair in one step
    fn claim_pair(&self, pattern: &str, inputs: &[String], outputs: &[String]) -> Option<(usize, usize, PortClaim)> {
        let mut claims = self.claims.lock();
        let (input, output) = select_pair(pattern, inputs, outputs, &claims)?;
        claims.inputs.insert(inputs[input].clone());
        claims.outputs.insert(outputs[output].clone());
        Some((
            input,
            output,
            PortClaim {
                input: inputs[input].clone(),
                output: outputs[output].clone(),
                claims: self.claims.clone(),
            },
        ))
    }

    /// List available MIDI input and output ports
    pub fn list_ports() -> Result<(Vec<PortInfo>, Vec<PortInfo>)> {
        let midi_in = MidiInput::new("LPD8-Ctl-Scanner")?;
        let inputs = midi_in
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| midi_in.port_name(port).ok().map(|name| PortInfo { index, name }))
            .collect();

        let midi_out = MidiOutput::new("LPD8-Ctl-Scanner")?;
        let outputs = midi_out
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| midi_out.port_name(port).ok().map(|name| PortInfo { index, name }))
            .collect();

        Ok((inputs, outputs))
    }

    /// Connect to the first unclaimed input/output pair matching `pattern`
    /// (case-insensitive substring match)
    pub fn open(&self, pattern: &str, note_channel: u8) -> Result<MidirTransport> {
        let mut midi_in = MidiInput::new("LPD8-Ctl-Input")?;
        // SysEx is ignored by default and carries every reply we need
        midi_in.ignore(Ignore::None);
        let midi_out = MidiOutput::new("LPD8-Ctl-Output")?;

        let (in_ports, in_names): (Vec<MidiInputPort>, Vec<String>) = midi_in
            .ports()
            .into_iter()
            .filter_map(|port| midi_in.port_name(&port).ok().map(|name| (port, name)))
            .unzip();
        let (out_ports, out_names): (Vec<MidiOutputPort>, Vec<String>) = midi_out
            .ports()
            .into_iter()
            .filter_map(|port| midi_out.port_name(&port).ok().map(|name| (port, name)))
            .unzip();

        let (input, output, claim) = self
            .claim_pair(pattern, &in_names, &out_names)
            .ok_or_else(|| Error::Transport(format!("No free input/output pair matching '{}'", pattern)))?;

        info!(
            "Connecting to LPD8 - Input: '{}', Output: '{}'",
            in_names[input], out_names[output]
        );

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let input = midi_in.connect(
            &in_ports[input],
            "LPD8-Ctl",
            move |_timestamp, data, _| {
                if let Some(message) = MidiMessage::parse(data) {
                    if event_tx.try_send(message).is_err() {
                        warn!("Inbound MIDI queue full, dropping {}", format_hex(data));
                    }
                } else {
                    trace!("Ignoring MIDI: {}", format_hex(data));
                }
            },
            (),
        )?;

        let output = midi_out.connect(&out_ports[output], "LPD8-Ctl")?;

        Ok(MidirTransport {
            _input: input,
            output,
            event_rx,
            note_channel,
            _claim: claim,
        })
    }
}

/// `midir` connection pair to one controller
pub struct MidirTransport {
    _input: MidiInputConnection<()>,
    output: MidiOutputConnection,
    event_rx: mpsc::Receiver<TransportEvent>,
    note_channel: u8,
    _claim: PortClaim,
}

impl MidirTransport {
    fn send(&mut self, message: &MidiMessage) -> Result<()> {
        let data = message.encode();
        self.output.send(&data)?;
        debug!("Sent: {} | {}", format_hex(&data), message);
        Ok(())
    }
}

impl Transport for MidirTransport {
    fn send_sysex(&mut self, data: &[u8]) -> Result<()> {
        self.send(&MidiMessage::SysEx { data: data.to_vec() })
    }

    fn send_note(&mut self, note: u8, on: bool) -> Result<()> {
        let channel = self.note_channel;
        let message = if on {
            MidiMessage::NoteOn { channel, note, velocity: LIGHT_VELOCITY }
        } else {
            MidiMessage::NoteOff { channel, note, velocity: LIGHT_VELOCITY }
        };
        self.send(&message)
    }

    fn drain_pending(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}
