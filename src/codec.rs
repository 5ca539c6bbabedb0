//! LPD8 SysEx codec
//!
//! Pure conversions between SysEx payloads (without the F0/F7 framing) and
//! [`Program`] values, plus the fixed request/query/select frames.
//!
//! Program dump layout:
//!
//! | offset    | content                                   |
//! |-----------|-------------------------------------------|
//! | 0         | manufacturer `0x47`                       |
//! | 1-2       | model `0x7F 0x75`                         |
//! | 3-5       | command (`63 00 3A` dump, `61 00 3A` write) |
//! | 6         | slot, 1-4                                 |
//! | 7         | channel                                   |
//! | 8 + 4i    | pad i: note, program change, cc, toggle   |
//! | 40 + 3i   | knob i: cc, low, high                     |

use crate::config::ActiveSlotEncoding;
use crate::error::{EncodeTarget, Error, Result};
use crate::program::{Knob, Pad, Program, KNOB_COUNT, MAX_DATA, PAD_COUNT, PROGRAM_COUNT};

/// Akai manufacturer id
pub const MANUFACTURER_ID: u8 = 0x47;

/// LPD8 model id
pub const MODEL_ID: [u8; 2] = [0x7F, 0x75];

/// Command bytes of a program dump sent by the device
pub const CMD_DUMP_RESPONSE: [u8; 3] = [0x63, 0x00, 0x3A];

/// Command bytes of a program write sent to the device
pub const CMD_WRITE_PROGRAM: [u8; 3] = [0x61, 0x00, 0x3A];

const CMD_DUMP_REQUEST: [u8; 3] = [0x63, 0x00, 0x01];
const CMD_ACTIVE_QUERY: [u8; 3] = [0x64, 0x00, 0x00];
const CMD_ACTIVE_RESPONSE: [u8; 3] = [0x64, 0x00, 0x01];
const CMD_SET_ACTIVE: [u8; 4] = [0x62, 0x00, 0x00, 0x01];

/// Channel byte written with every program
pub const WRITE_CHANNEL: u8 = 0x06;

/// Length of a program dump/write payload
pub const PROGRAM_FRAME_LEN: usize = 64;

const PAD_OFFSET: usize = 8;
const PAD_STRIDE: usize = 4;
const KNOB_OFFSET: usize = 40;
const KNOB_STRIDE: usize = 3;

/// A recognised reply from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysexReply {
    /// Program dump for the slot carried in the frame
    Program(Program),
    /// Currently selected slot (zero-based)
    ActiveProgram(usize),
}

/// Classify an inbound SysEx payload
///
/// Attempts are tried in order: program dump, then active-program response.
/// Returns `None` for anything else (other vendors, echoed program writes,
/// truncated frames).
pub fn classify_sysex(frame: &[u8]) -> Option<SysexReply> {
    frame
        .get(3..6)
        .filter(|command| *command == CMD_DUMP_RESPONSE)
        .and_then(|_| decode_program(frame).ok())
        .map(SysexReply::Program)
        .or_else(|| decode_active_program(frame).ok().map(SysexReply::ActiveProgram))
}

fn header() -> [u8; 3] {
    [MANUFACTURER_ID, MODEL_ID[0], MODEL_ID[1]]
}

fn check_header(frame: &[u8]) -> Result<()> {
    if frame.first() != Some(&MANUFACTURER_ID) {
        return Err(Error::Decode(format!(
            "Manufacturer byte invalid: {:02X?} (should be 0x47)",
            frame.first()
        )));
    }
    if frame.get(1..3) != Some(&MODEL_ID[..]) {
        return Err(Error::Decode(format!(
            "Model bytes invalid: {:02X?} (should be 7F 75)",
            frame.get(1..3)
        )));
    }
    Ok(())
}

fn decode_slot(byte: u8) -> Result<usize> {
    if !(1..=PROGRAM_COUNT as u8).contains(&byte) {
        return Err(Error::Decode(format!("Slot byte out of range: {} (must be 1-4)", byte)));
    }
    Ok(byte as usize - 1)
}

fn data_byte(frame: &[u8], offset: usize) -> Result<u8> {
    let value = frame[offset];
    if value > MAX_DATA {
        return Err(Error::Decode(format!(
            "Data byte at offset {} out of range: 0x{:02X}",
            offset, value
        )));
    }
    Ok(value)
}

/// Decode a program frame
///
/// Accepts dump responses and program writes, so an encoded program decodes
/// back to itself.
pub fn decode_program(frame: &[u8]) -> Result<Program> {
    if frame.len() < PROGRAM_FRAME_LEN {
        return Err(Error::Decode(format!(
            "Program dump too short: {} bytes (need {})",
            frame.len(),
            PROGRAM_FRAME_LEN
        )));
    }
    check_header(frame)?;
    if frame[3..6] != CMD_DUMP_RESPONSE && frame[3..6] != CMD_WRITE_PROGRAM {
        return Err(Error::Decode(format!(
            "Command bytes invalid: {:02X?} (should be 63 00 3A or 61 00 3A)",
            &frame[3..6]
        )));
    }

    let slot = decode_slot(frame[6])?;

    let mut pads = Vec::with_capacity(PAD_COUNT);
    for i in 0..PAD_COUNT {
        let base = PAD_OFFSET + PAD_STRIDE * i;
        let toggle = match frame[base + 3] {
            0 => false,
            1 => true,
            other => {
                return Err(Error::Decode(format!(
                    "Toggle for pad {} invalid: {} (must be 0 or 1)",
                    i, other
                )))
            }
        };
        pads.push(Pad {
            note: data_byte(frame, base)?,
            program_change: data_byte(frame, base + 1)?,
            control_change: data_byte(frame, base + 2)?,
            toggle,
        });
    }

    let mut knobs = Vec::with_capacity(KNOB_COUNT);
    for i in 0..KNOB_COUNT {
        let base = KNOB_OFFSET + KNOB_STRIDE * i;
        knobs.push(Knob {
            control_change: data_byte(frame, base)?,
            low: data_byte(frame, base + 1)?,
            high: data_byte(frame, base + 2)?,
        });
    }

    Ok(Program { slot, pads, knobs })
}

fn check_field(target: EncodeTarget, field: &'static str, value: u8) -> Result<u8> {
    if value > MAX_DATA {
        return Err(Error::Encode {
            target,
            field,
            value: value as usize,
            expected: "0-127",
        });
    }
    Ok(value)
}

/// Encode a program into a write frame
pub fn encode_program(program: &Program) -> Result<Vec<u8>> {
    if program.slot >= PROGRAM_COUNT {
        return Err(Error::Encode {
            target: EncodeTarget::Program,
            field: "slot",
            value: program.slot,
            expected: "0-3",
        });
    }
    if program.pads.len() != PAD_COUNT {
        return Err(Error::Encode {
            target: EncodeTarget::Program,
            field: "pad count",
            value: program.pads.len(),
            expected: "exactly 8",
        });
    }
    if program.knobs.len() != KNOB_COUNT {
        return Err(Error::Encode {
            target: EncodeTarget::Program,
            field: "knob count",
            value: program.knobs.len(),
            expected: "exactly 8",
        });
    }

    let mut data = Vec::with_capacity(PROGRAM_FRAME_LEN);
    data.extend_from_slice(&header());
    data.extend_from_slice(&CMD_WRITE_PROGRAM);
    data.push(program.slot as u8 + 1);
    data.push(WRITE_CHANNEL);

    for (i, pad) in program.pads.iter().enumerate() {
        let target = EncodeTarget::Pad(i);
        data.push(check_field(target, "note", pad.note)?);
        data.push(check_field(target, "program_change", pad.program_change)?);
        data.push(check_field(target, "control_change", pad.control_change)?);
        data.push(pad.toggle as u8);
    }

    for (i, knob) in program.knobs.iter().enumerate() {
        let target = EncodeTarget::Knob(i);
        data.push(check_field(target, "control_change", knob.control_change)?);
        data.push(check_field(target, "low", knob.low)?);
        data.push(check_field(target, "high", knob.high)?);
    }

    Ok(data)
}

/// Request the dump of one slot
pub fn dump_request(slot: usize) -> Result<Vec<u8>> {
    Error::check_range("program slot", slot, PROGRAM_COUNT - 1)?;
    let mut data = header().to_vec();
    data.extend_from_slice(&CMD_DUMP_REQUEST);
    data.push(slot as u8 + 1);
    Ok(data)
}

/// Ask the device which slot is selected
pub fn active_program_query() -> Vec<u8> {
    let mut data = header().to_vec();
    data.extend_from_slice(&CMD_ACTIVE_QUERY);
    data
}

/// Decode the reply to [`active_program_query`] into a zero-based slot
pub fn decode_active_program(frame: &[u8]) -> Result<usize> {
    check_header(frame)?;
    if frame.len() != 7 || frame[3..6] != CMD_ACTIVE_RESPONSE {
        return Err(Error::Decode(format!(
            "Not an active program response: {:02X?}",
            frame
        )));
    }
    decode_slot(frame[6])
}

/// Select the active slot on the device
pub fn set_active_program(slot: usize, encoding: ActiveSlotEncoding) -> Result<Vec<u8>> {
    Error::check_range("program slot", slot, PROGRAM_COUNT - 1)?;
    let mut data = header().to_vec();
    data.extend_from_slice(&CMD_SET_ACTIVE);
    data.push(encoding.wire_value(slot));
    Ok(data)
}
