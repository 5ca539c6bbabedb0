//! Error types for the LPD8 driver.

use thiserror::Error;

use crate::ambiguity::{Conflict, ControlRef};

/// Pad or knob addressed by an encode error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeTarget {
    Program,
    Pad(usize),
    Knob(usize),
}

impl std::fmt::Display for EncodeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeTarget::Program => write!(f, "program"),
            EncodeTarget::Pad(i) => write!(f, "pad {}", i),
            EncodeTarget::Knob(i) => write!(f, "knob {}", i),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or foreign SysEx frame. Recoverable.
    #[error("SysEx decode error: {0}")]
    Decode(String),

    #[error("Cannot encode {target}: {field} = {value} out of range ({expected})")]
    Encode {
        target: EncodeTarget,
        field: &'static str,
        value: usize,
        expected: &'static str,
    },

    #[error("Timed out waiting for program dump of slot {slot}")]
    SetupTimeout { slot: usize },

    #[error("{} ambiguous control(s) found and auto-fix is disabled", .0.len())]
    AmbiguityConflict(Vec<Conflict>),

    #[error("Cannot resolve {field} of {control}: all 128 values are taken")]
    UnresolvableAmbiguity {
        control: ControlRef,
        field: &'static str,
    },

    #[error("{what} {value} out of range (must be 0-{max})")]
    Range {
        what: &'static str,
        value: usize,
        max: usize,
    },

    #[error("MIDI transport error: {0}")]
    Transport(String),

    #[error("Program slot {0} has not been fetched from the device")]
    NotLoaded(usize),
}

impl Error {
    /// Range check helper for public operations.
    pub(crate) fn check_range(what: &'static str, value: usize, max: usize) -> Result<()> {
        if value > max {
            return Err(Error::Range { what, value, max });
        }
        Ok(())
    }
}

impl From<midir::InitError> for Error {
    fn from(e: midir::InitError) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<midir::SendError> for Error {
    fn from(e: midir::SendError) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiOutput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiInput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        Error::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
