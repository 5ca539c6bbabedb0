//! Cross-program ambiguity detection and resolution
//!
//! The LPD8 reports every pad and knob as a bare note / CC / program-change
//! number on a shared channel, so two controls using the same number cannot
//! be told apart. A device is unambiguous when, across all programs:
//!
//! - no two pads share a note, a CC or a program change
//! - no two knobs share a CC
//! - no pad CC equals a knob CC
//!
//! Resolution only ever mutates the control being resolved. Callers resolve
//! each control in program, pad, knob order so earlier fixes are visible to
//! later checks (see [`resolve_all`]).

use std::fmt;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::program::{Program, MAX_DATA};

/// Increments allowed per field before giving up
pub const MAX_RESOLVE_ATTEMPTS: usize = 127;

/// Position of a pad or knob; identity for conflict checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlRef {
    Pad { program: usize, index: usize },
    Knob { program: usize, index: usize },
}

impl fmt::Display for ControlRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlRef::Pad { program, index } => write!(f, "program {} pad {}", program, index),
            ControlRef::Knob { program, index } => write!(f, "program {} knob {}", program, index),
        }
    }
}

/// A control and every other control it collides with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub control: ControlRef,
    pub conflicts_with: Vec<ControlRef>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} collides with ", self.control)?;
        for (i, other) in self.conflicts_with.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", other)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Note,
    ControlChange,
    ProgramChange,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Field::Note => "note",
            Field::ControlChange => "control_change",
            Field::ProgramChange => "program_change",
        }
    }
}

/// All controls in program, pad, knob order
fn controls(programs: &[Program]) -> Vec<ControlRef> {
    let mut refs = Vec::new();
    for (program, p) in programs.iter().enumerate() {
        refs.extend((0..p.pads.len()).map(|index| ControlRef::Pad { program, index }));
        refs.extend((0..p.knobs.len()).map(|index| ControlRef::Knob { program, index }));
    }
    refs
}

fn read(programs: &[Program], control: ControlRef, field: Field) -> Option<u8> {
    match control {
        ControlRef::Pad { program, index } => {
            let pad = programs.get(program)?.pads.get(index)?;
            Some(match field {
                Field::Note => pad.note,
                Field::ControlChange => pad.control_change,
                Field::ProgramChange => pad.program_change,
            })
        }
        ControlRef::Knob { program, index } => {
            let knob = programs.get(program)?.knobs.get(index)?;
            match field {
                Field::ControlChange => Some(knob.control_change),
                Field::Note | Field::ProgramChange => None,
            }
        }
    }
}

fn write(programs: &mut [Program], control: ControlRef, field: Field, value: u8) {
    match control {
        ControlRef::Pad { program, index } => {
            if let Some(pad) = programs.get_mut(program).and_then(|p| p.pads.get_mut(index)) {
                match field {
                    Field::Note => pad.note = value,
                    Field::ControlChange => pad.control_change = value,
                    Field::ProgramChange => pad.program_change = value,
                }
            }
        }
        ControlRef::Knob { program, index } => {
            if let Some(knob) = programs.get_mut(program).and_then(|p| p.knobs.get_mut(index)) {
                if field == Field::ControlChange {
                    knob.control_change = value;
                }
            }
        }
    }
}

/// Whether any control other than `candidate` uses `value` for `field`.
///
/// Knobs only carry a CC, so `read` yields `None` for their note and program
/// change and they never compete on those fields.
fn is_taken(programs: &[Program], candidate: ControlRef, field: Field, value: u8) -> bool {
    controls(programs)
        .into_iter()
        .filter(|other| *other != candidate)
        .any(|other| read(programs, other, field) == Some(value))
}

fn fields_of(control: ControlRef) -> &'static [Field] {
    match control {
        ControlRef::Pad { .. } => &[Field::Note, Field::ControlChange, Field::ProgramChange],
        ControlRef::Knob { .. } => &[Field::ControlChange],
    }
}

/// Every control that collides with `candidate`, in program, pad, knob order
///
/// Returns an empty list when `candidate` does not exist.
pub fn find_conflicts(candidate: ControlRef, programs: &[Program]) -> Vec<ControlRef> {
    let fields = fields_of(candidate);
    let values: Vec<(Field, u8)> = fields
        .iter()
        .filter_map(|&field| read(programs, candidate, field).map(|v| (field, v)))
        .collect();
    if values.is_empty() {
        return Vec::new();
    }

    controls(programs)
        .into_iter()
        .filter(|other| *other != candidate)
        .filter(|&other| {
            values
                .iter()
                .any(|&(field, value)| read(programs, other, field) == Some(value))
        })
        .collect()
}

/// Scan the whole device
pub fn find_all_conflicts(programs: &[Program]) -> Vec<Conflict> {
    controls(programs)
        .into_iter()
        .filter_map(|control| {
            let conflicts_with = find_conflicts(control, programs);
            (!conflicts_with.is_empty()).then_some(Conflict {
                control,
                conflicts_with,
            })
        })
        .collect()
}

fn resolve_field(candidate: ControlRef, field: Field, programs: &mut [Program]) -> Result<bool> {
    let Some(original) = read(programs, candidate, field) else {
        return Ok(false);
    };

    let mut value = original;
    let mut attempts = 0;
    while is_taken(programs, candidate, field, value) {
        if attempts == MAX_RESOLVE_ATTEMPTS {
            return Err(Error::UnresolvableAmbiguity {
                control: candidate,
                field: field.name(),
            });
        }
        value = value.wrapping_add(1) % (MAX_DATA + 1);
        attempts += 1;
    }

    if value != original {
        debug!("{}: {} {} -> {}", candidate, field.name(), original, value);
        write(programs, candidate, field, value);
    }
    Ok(value != original)
}

/// Renumber `candidate` until none of its triggers collide
///
/// Fields are fixed in order note, CC, program change (knobs only have a CC).
/// Returns whether anything changed.
pub fn resolve(candidate: ControlRef, programs: &mut [Program]) -> Result<bool> {
    let exists = match candidate {
        ControlRef::Pad { program, index } => programs.get(program).map_or(false, |p| index < p.pads.len()),
        ControlRef::Knob { program, index } => programs.get(program).map_or(false, |p| index < p.knobs.len()),
    };
    if !exists {
        return Err(Error::Range {
            what: "control",
            value: match candidate {
                ControlRef::Pad { index, .. } | ControlRef::Knob { index, .. } => index,
            },
            max: 7,
        });
    }

    let mut changed = false;
    for &field in fields_of(candidate) {
        changed |= resolve_field(candidate, field, programs)?;
    }
    Ok(changed)
}

/// Resolve every control on the device; returns how many were renumbered
pub fn resolve_all(programs: &mut [Program]) -> Result<usize> {
    let mut fixed = 0;
    for control in controls(programs) {
        if resolve(control, programs)? {
            warn!("Renumbered ambiguous {}", control);
            fixed += 1;
        }
    }
    Ok(fixed)
}
