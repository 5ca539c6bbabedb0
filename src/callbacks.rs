//! Callback registry for pad and knob triggers
//!
//! Handlers are attached to one trigger of one pad or knob in one program.
//! Inbound performance messages are matched against the records in
//! registration order and only the first matching record fires.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::midi::MidiMessage;

/// Callback invoked when a registered trigger fires
pub type TriggerCallback = Arc<dyn Fn(&TriggerEvent) + Send + Sync>;

/// Which of a pad's three triggers a callback listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadTrigger {
    Note,
    ControlChange,
    ProgramChange,
}

impl PadTrigger {
    pub const ALL: [PadTrigger; 3] = [
        PadTrigger::Note,
        PadTrigger::ControlChange,
        PadTrigger::ProgramChange,
    ];
}

/// Trigger value a record listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    PadNote { note: u8 },
    PadControlChange { cc: u8 },
    PadProgramChange { program: u8 },
    KnobControlChange { cc: u8 },
}

/// Arguments passed to a callback; fields that do not apply are `None`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerEvent {
    /// Program slot the record was registered for
    pub program: usize,
    pub pad: Option<usize>,
    pub knob: Option<usize>,
    /// Velocity for notes, value for control changes
    pub value: Option<u8>,
    pub note_on: Option<u8>,
    pub note_off: Option<u8>,
    pub control_change: Option<u8>,
    pub program_change: Option<u8>,
}

struct CallbackRecord {
    slot: usize,
    index: usize,
    trigger: Trigger,
    handlers: Vec<TriggerCallback>,
}

impl CallbackRecord {
    fn is_for(&self, slot: usize, index: usize, trigger: Trigger) -> bool {
        self.slot == slot && self.index == index && self.trigger == trigger
    }

    /// Build the callback arguments if `message` hits this record
    fn event_for(&self, message: &MidiMessage) -> Option<TriggerEvent> {
        let pad = TriggerEvent {
            program: self.slot,
            pad: Some(self.index),
            ..Default::default()
        };

        match (self.trigger, message) {
            (Trigger::PadNote { note }, &MidiMessage::NoteOn { note: n, velocity, .. }) if n == note => {
                Some(TriggerEvent {
                    value: Some(velocity),
                    note_on: Some(n),
                    ..pad
                })
            }
            (Trigger::PadNote { note }, &MidiMessage::NoteOff { note: n, velocity, .. }) if n == note => {
                Some(TriggerEvent {
                    value: Some(velocity),
                    note_off: Some(n),
                    ..pad
                })
            }
            (Trigger::PadControlChange { cc }, &MidiMessage::ControlChange { cc: c, value, .. }) if c == cc => {
                Some(TriggerEvent {
                    value: Some(value),
                    control_change: Some(c),
                    ..pad
                })
            }
            (Trigger::PadProgramChange { program }, &MidiMessage::ProgramChange { program: p, .. })
                if p == program =>
            {
                Some(TriggerEvent {
                    program_change: Some(p),
                    ..pad
                })
            }
            (Trigger::KnobControlChange { cc }, &MidiMessage::ControlChange { cc: c, value, .. }) if c == cc => {
                Some(TriggerEvent {
                    program: self.slot,
                    knob: Some(self.index),
                    value: Some(value),
                    control_change: Some(c),
                    ..Default::default()
                })
            }
            _ => None,
        }
    }
}

/// Ordered set of callback records
#[derive(Default)]
pub struct CallbackRegistry {
    records: Vec<CallbackRecord>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `handler` to a record, creating the record if needed
    ///
    /// Registering the same handler (by `Arc` identity) twice is a no-op.
    pub fn register(&mut self, slot: usize, index: usize, trigger: Trigger, handler: TriggerCallback) {
        match self.records.iter_mut().find(|r| r.is_for(slot, index, trigger)) {
            Some(record) => {
                if !record.handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                    record.handlers.push(handler);
                }
            }
            None => self.records.push(CallbackRecord {
                slot,
                index,
                trigger,
                handlers: vec![handler],
            }),
        }
    }

    /// Detach `handler`; unknown records or handlers are ignored
    pub fn unregister(&mut self, slot: usize, index: usize, trigger: Trigger, handler: &TriggerCallback) {
        if let Some(record) = self.records.iter_mut().find(|r| r.is_for(slot, index, trigger)) {
            record.handlers.retain(|h| !Arc::ptr_eq(h, handler));
        }
        // An empty record would still swallow matching events
        self.records.retain(|r| !r.handlers.is_empty());
    }

    /// Fire the handlers of the first record matching `message`
    ///
    /// Returns whether a record matched.
    pub fn route(&self, message: &MidiMessage) -> bool {
        for record in &self.records {
            if let Some(event) = record.event_for(message) {
                trace!("{} -> {:?}", message, record.trigger);
                for handler in &record.handlers {
                    handler(&event);
                }
                return true;
            }
        }
        false
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.records.iter().map(|r| (r.slot, r.index, r.trigger, r.handlers.len())))
            .finish()
    }
}
