//! In-memory mirror of the LPD8 configuration programs
//!
//! A program holds the trigger mapping of all 8 pads and 8 knobs for one of
//! the four hardware slots.

use std::fmt;

/// Number of program slots on the device
pub const PROGRAM_COUNT: usize = 4;

/// Pads per program
pub const PAD_COUNT: usize = 8;

/// Knobs per program
pub const KNOB_COUNT: usize = 8;

/// Highest value of a 7-bit MIDI data byte
pub const MAX_DATA: u8 = 127;

/// One physical pad: three independent triggers plus latching behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pad {
    pub note: u8,
    pub program_change: u8,
    pub control_change: u8,
    pub toggle: bool,
}

impl Pad {
    pub fn new(note: u8, program_change: u8, control_change: u8, toggle: bool) -> Self {
        Self {
            note,
            program_change,
            control_change,
            toggle,
        }
    }
}

impl fmt::Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "note={} pc={} cc={} toggle={}",
            self.note, self.program_change, self.control_change, self.toggle
        )
    }
}

/// One physical knob: output controller and value range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Knob {
    pub control_change: u8,
    pub low: u8,
    pub high: u8,
}

impl Knob {
    pub fn new(control_change: u8, low: u8, high: u8) -> Self {
        Self {
            control_change,
            low,
            high,
        }
    }
}

impl Default for Knob {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

impl fmt::Display for Knob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cc={} range={}-{}", self.control_change, self.low, self.high)
    }
}

/// Configuration of one hardware slot
///
/// `pads` and `knobs` must both hold exactly 8 entries; the codec refuses to
/// encode anything else rather than padding or truncating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Zero-based slot index (wire value is `slot + 1`)
    pub slot: usize,
    pub pads: Vec<Pad>,
    pub knobs: Vec<Knob>,
}

impl Program {
    /// Create a placeholder program with identity pads (pad `i` plays note `i`)
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            pads: (0..PAD_COUNT as u8).map(|i| Pad::new(i, 0, 0, false)).collect(),
            knobs: vec![Knob::default(); KNOB_COUNT],
        }
    }

    /// Apply the device quirks the session relies on: momentary pads and
    /// full-range knobs.
    pub fn normalize(&mut self) {
        for pad in &mut self.pads {
            pad.toggle = false;
        }
        for knob in &mut self.knobs {
            knob.low = 0;
            knob.high = MAX_DATA;
        }
    }

    pub fn pad(&self, index: usize) -> Option<&Pad> {
        self.pads.get(index)
    }

    pub fn knob(&self, index: usize) -> Option<&Knob> {
        self.knobs.get(index)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Program {}", self.slot + 1)?;
        for (i, pad) in self.pads.iter().enumerate() {
            writeln!(f, "  pad {}: {}", i + 1, pad)?;
        }
        for (i, knob) in self.knobs.iter().enumerate() {
            writeln!(f, "  knob {}: {}", i + 1, knob)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_program_has_identity_pads() {
        let program = Program::new(2);
        assert_eq!(program.slot, 2);
        assert_eq!(program.pads.len(), PAD_COUNT);
        assert_eq!(program.knobs.len(), KNOB_COUNT);
        for (i, pad) in program.pads.iter().enumerate() {
            assert_eq!(pad.note as usize, i);
            assert_eq!(pad.program_change, 0);
            assert_eq!(pad.control_change, 0);
            assert!(!pad.toggle);
        }
    }

    #[test]
    fn test_normalize() {
        let mut program = Program::new(0);
        program.pads[3].toggle = true;
        program.knobs[5] = Knob::new(20, 10, 90);

        program.normalize();

        assert!(program.pads.iter().all(|p| !p.toggle));
        assert!(program.knobs.iter().all(|k| k.low == 0 && k.high == 127));
        // Controller numbers are untouched
        assert_eq!(program.knobs[5].control_change, 20);
    }

    #[test]
    fn test_display() {
        let pad = Pad::new(36, 1, 2, true);
        assert_eq!(pad.to_string(), "note=36 pc=1 cc=2 toggle=true");

        let knob = Knob::new(1, 0, 127);
        assert_eq!(knob.to_string(), "cc=1 range=0-127");

        let text = Program::new(0).to_string();
        assert!(text.starts_with("Program 1\n"));
        assert!(text.contains("knob 8: cc=0 range=0-0"));
    }
}
