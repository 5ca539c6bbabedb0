//! Device session - state machine for one LPD8
//!
//! The session owns the in-memory mirror of the four programs, the callback
//! registry and the pacing timers. It is constructed through a blocking
//! bootstrap:
//!
//! 1. request each program dump and wait for the reply
//! 2. normalize the programs (momentary pads, full-range knobs)
//! 3. detect ambiguous triggers and renumber them if auto-fix is enabled
//! 4. write all four programs back, paced
//! 5. select program 1
//!
//! After that it is driven by repeated [`DeviceSession::tick`] calls. Nothing
//! runs in the background; a host that stops ticking simply stops receiving
//! callbacks.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::ambiguity::{find_all_conflicts, resolve_all, Conflict};
use crate::callbacks::{CallbackRegistry, PadTrigger, Trigger, TriggerCallback};
use crate::codec::{self, SysexReply};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::midi::{format_hex, MidiMessage};
use crate::pacing::{PollTimer, WritePacer};
use crate::program::{Pad, Program, KNOB_COUNT, PAD_COUNT, PROGRAM_COUNT};
use crate::transport::Transport;

#[cfg(test)]
mod tests;

/// Sleep between drains while waiting for a program dump
const DUMP_WAIT_STEP: Duration = Duration::from_millis(1);

/// Observer notified when the device reports a different active program
pub type ProgramChangeObserver = Box<dyn FnMut(usize) + Send>;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    FetchingPrograms,
    ResolvingAmbiguity,
    Ready,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::FetchingPrograms => write!(f, "fetching programs"),
            SessionState::ResolvingAmbiguity => write!(f, "resolving ambiguity"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// A bootstrapped connection to one controller
pub struct DeviceSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    programs: [Option<Program>; PROGRAM_COUNT],
    current_active_slot: usize,
    pacer: WritePacer,
    poll_timer: PollTimer,
    state: SessionState,
    callbacks: CallbackRegistry,
    on_program_change: Option<ProgramChangeObserver>,
}

impl<T: Transport> DeviceSession<T> {
    /// Bootstrap a session on `transport`
    ///
    /// Blocks until every program has been fetched, checked and written back.
    /// Any failure aborts construction; a session is never returned half set up.
    pub fn connect(transport: T, config: SessionConfig) -> Result<Self> {
        let mut session = Self {
            transport,
            pacer: WritePacer::new(config.write_interval()),
            config,
            programs: Default::default(),
            current_active_slot: 0,
            poll_timer: PollTimer::new(),
            state: SessionState::Uninitialized,
            callbacks: CallbackRegistry::new(),
            on_program_change: None,
        };

        match session.bootstrap() {
            Ok(()) => Ok(session),
            Err(e) => {
                error!("LPD8 setup failed during {}: {}", session.state, e);
                session.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn bootstrap(&mut self) -> Result<()> {
        self.state = SessionState::FetchingPrograms;
        for slot in 0..PROGRAM_COUNT {
            self.fetch_program(slot)?;
        }
        info!("Fetched {} programs", PROGRAM_COUNT);

        self.state = SessionState::ResolvingAmbiguity;
        let mut programs = self.loaded_programs()?;
        for program in &mut programs {
            program.normalize();
        }

        let conflicts = find_all_conflicts(&programs);
        if !conflicts.is_empty() {
            if !self.config.auto_fix_ambiguity {
                for conflict in &conflicts {
                    warn!("Ambiguous trigger: {}", conflict);
                }
                return Err(Error::AmbiguityConflict(conflicts));
            }
            let fixed = resolve_all(&mut programs)?;
            info!("Renumbered {} ambiguous control(s)", fixed);
        }

        for program in programs {
            self.write_program(program)?;
        }

        self.set_active_program(0)?;
        self.state = SessionState::Ready;
        info!("LPD8 session ready");
        Ok(())
    }

    /// Request one dump and drain until it lands in its slot
    fn fetch_program(&mut self, slot: usize) -> Result<()> {
        self.transport.send_sysex(&codec::dump_request(slot)?)?;

        let deadline = Instant::now() + self.config.dump_timeout();
        loop {
            self.process_pending();
            if self.programs[slot].is_some() {
                debug!("Received program {}", slot + 1);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::SetupTimeout { slot });
            }
            thread::sleep(DUMP_WAIT_STEP);
        }
    }

    fn loaded_programs(&self) -> Result<Vec<Program>> {
        self.programs
            .iter()
            .enumerate()
            .map(|(slot, p)| p.clone().ok_or(Error::NotLoaded(slot)))
            .collect()
    }

    /// Drain the transport and dispatch everything that arrived
    fn process_pending(&mut self) {
        for event in self.transport.drain_pending() {
            match event {
                MidiMessage::SysEx { data } => self.handle_sysex(&data),
                message if self.state == SessionState::Ready => {
                    if !self.callbacks.route(&message) {
                        trace!("Unhandled: {}", message);
                    }
                }
                message => trace!("Ignoring {} during setup", message),
            }
        }
    }

    fn handle_sysex(&mut self, data: &[u8]) {
        match codec::classify_sysex(data) {
            Some(SysexReply::Program(program)) => {
                debug!("Program dump for slot {}", program.slot + 1);
                let slot = program.slot;
                self.programs[slot] = Some(program);
            }
            Some(SysexReply::ActiveProgram(slot)) => self.update_active_slot(slot),
            None => trace!("Dropping SysEx: {}", format_hex(data)),
        }
    }

    fn update_active_slot(&mut self, slot: usize) {
        if slot != self.current_active_slot {
            info!("Active program changed: {} -> {}", self.current_active_slot + 1, slot + 1);
            if let Some(observer) = self.on_program_change.as_mut() {
                observer(slot);
            }
        }
        self.current_active_slot = slot;
    }

    /// Process inbound traffic and poll the active program when due
    ///
    /// The active-program query is fire-and-forget; its reply is handled by a
    /// later tick.
    pub fn tick(&mut self, poll_interval: Duration) -> Result<()> {
        self.process_pending();

        if self.poll_timer.is_due(poll_interval) {
            self.transport.send_sysex(&codec::active_program_query())?;
            self.poll_timer.mark();
        }
        Ok(())
    }

    /// [`tick`](Self::tick) with the configured poll interval
    pub fn tick_default(&mut self) -> Result<()> {
        self.tick(self.config.poll_interval())
    }

    /// Send a configuration frame once the pacing interval allows it
    fn send_paced(&mut self, data: &[u8]) -> Result<()> {
        let remaining = self.pacer.remaining();
        if !remaining.is_zero() {
            trace!("Pacing configuration write for {:?}", remaining);
        }
        self.pacer.wait();
        self.transport.send_sysex(data)?;
        self.pacer.mark();
        Ok(())
    }

    /// Write a whole program to its slot (paced) and update the mirror
    pub fn write_program(&mut self, program: Program) -> Result<()> {
        let data = codec::encode_program(&program)?;
        self.send_paced(&data)?;
        debug!("Wrote program {}", program.slot + 1);
        let slot = program.slot;
        self.programs[slot] = Some(program);
        Ok(())
    }

    /// Switch a pad between momentary and latching, rewriting its program
    pub fn set_pad_toggle(&mut self, slot: usize, pad: usize, value: bool) -> Result<()> {
        Error::check_range("program slot", slot, PROGRAM_COUNT - 1)?;
        Error::check_range("pad", pad, PAD_COUNT - 1)?;

        let mut program = self.programs[slot].clone().ok_or(Error::NotLoaded(slot))?;
        let target = program.pads.get_mut(pad).ok_or(Error::Range {
            what: "pad",
            value: pad,
            max: PAD_COUNT - 1,
        })?;
        target.toggle = value;
        self.write_program(program)
    }

    /// Select the active program on the device (paced)
    ///
    /// `current_active_slot` follows once the device reports the change.
    pub fn set_active_program(&mut self, slot: usize) -> Result<()> {
        let data = codec::set_active_program(slot, self.config.active_slot_encoding)?;
        self.send_paced(&data)?;
        debug!("Selected program {}", slot + 1);
        Ok(())
    }

    /// Light or clear a pad of the active program
    ///
    /// This is a performance message, not a configuration write, so it is not
    /// paced.
    pub fn light_pad(&mut self, pad: usize, on: bool) -> Result<()> {
        Error::check_range("pad", pad, PAD_COUNT - 1)?;
        let slot = self.current_active_slot;
        let note = self.pad_value(slot, pad, |p| p.note)?;
        self.transport.send_note(note, on)
    }

    fn pad_value(&self, slot: usize, pad: usize, field: impl Fn(&Pad) -> u8) -> Result<u8> {
        let program = self.programs[slot].as_ref().ok_or(Error::NotLoaded(slot))?;
        program.pad(pad).map(field).ok_or(Error::Range {
            what: "pad",
            value: pad,
            max: PAD_COUNT - 1,
        })
    }

    fn knob_cc(&self, slot: usize, knob: usize) -> Result<u8> {
        let program = self.programs[slot].as_ref().ok_or(Error::NotLoaded(slot))?;
        program.knob(knob).map(|k| k.control_change).ok_or(Error::Range {
            what: "knob",
            value: knob,
            max: KNOB_COUNT - 1,
        })
    }

    fn pad_triggers(&self, slot: usize, pad: usize, triggers: &[PadTrigger]) -> Result<Vec<Trigger>> {
        Error::check_range("program slot", slot, PROGRAM_COUNT - 1)?;
        Error::check_range("pad", pad, PAD_COUNT - 1)?;
        triggers
            .iter()
            .map(|trigger| {
                Ok(match trigger {
                    PadTrigger::Note => Trigger::PadNote {
                        note: self.pad_value(slot, pad, |p| p.note)?,
                    },
                    PadTrigger::ControlChange => Trigger::PadControlChange {
                        cc: self.pad_value(slot, pad, |p| p.control_change)?,
                    },
                    PadTrigger::ProgramChange => Trigger::PadProgramChange {
                        program: self.pad_value(slot, pad, |p| p.program_change)?,
                    },
                })
            })
            .collect()
    }

    fn knob_trigger(&self, slot: usize, knob: usize) -> Result<Trigger> {
        Error::check_range("program slot", slot, PROGRAM_COUNT - 1)?;
        Error::check_range("knob", knob, KNOB_COUNT - 1)?;
        Ok(Trigger::KnobControlChange {
            cc: self.knob_cc(slot, knob)?,
        })
    }

    /// Call `handler` when the given triggers of a pad fire
    ///
    /// The trigger values are taken from the program as it is now.
    pub fn register_pad_callback(
        &mut self,
        slot: usize,
        pad: usize,
        handler: TriggerCallback,
        triggers: &[PadTrigger],
    ) -> Result<()> {
        for trigger in self.pad_triggers(slot, pad, triggers)? {
            self.callbacks.register(slot, pad, trigger, handler.clone());
        }
        Ok(())
    }

    pub fn unregister_pad_callback(
        &mut self,
        slot: usize,
        pad: usize,
        handler: &TriggerCallback,
        triggers: &[PadTrigger],
    ) -> Result<()> {
        for trigger in self.pad_triggers(slot, pad, triggers)? {
            self.callbacks.unregister(slot, pad, trigger, handler);
        }
        Ok(())
    }

    /// Call `handler` when a knob moves
    pub fn register_knob_callback(&mut self, slot: usize, knob: usize, handler: TriggerCallback) -> Result<()> {
        let trigger = self.knob_trigger(slot, knob)?;
        self.callbacks.register(slot, knob, trigger, handler);
        Ok(())
    }

    pub fn unregister_knob_callback(&mut self, slot: usize, knob: usize, handler: &TriggerCallback) -> Result<()> {
        let trigger = self.knob_trigger(slot, knob)?;
        self.callbacks.unregister(slot, knob, trigger, handler);
        Ok(())
    }

    /// Notify `observer` with the new slot whenever the device reports a
    /// different active program
    pub fn set_program_change_observer(&mut self, observer: impl FnMut(usize) + Send + 'static) {
        self.on_program_change = Some(Box::new(observer));
    }

    /// Re-run conflict detection over the mirror
    ///
    /// Uniqueness is only enforced at setup; callers that write programs
    /// afterwards can use this to check them.
    pub fn check_ambiguity(&self) -> Result<Vec<Conflict>> {
        Ok(find_all_conflicts(&self.loaded_programs()?))
    }

    pub fn program(&self, slot: usize) -> Option<&Program> {
        self.programs.get(slot)?.as_ref()
    }

    pub fn programs(&self) -> &[Option<Program>; PROGRAM_COUNT] {
        &self.programs
    }

    /// Zero-based slot last reported by the device
    pub fn current_active_slot(&self) -> usize {
        self.current_active_slot
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: Transport> fmt::Debug for DeviceSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &self.state)
            .field("current_active_slot", &self.current_active_slot)
            .field("programs", &self.programs)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}
