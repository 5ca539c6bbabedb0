//! Tests for the device session, against a scripted in-memory controller

use super::*;
use crate::ambiguity::ControlRef;
use crate::callbacks::TriggerEvent;
use crate::codec::{CMD_DUMP_RESPONSE, CMD_WRITE_PROGRAM};
use crate::config::ActiveSlotEncoding;
use crate::program::Knob;
use crate::transport::TransportEvent;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Fake LPD8 answering dump requests and active-program queries
struct FakeDevice {
    programs: Vec<Program>,
    active_slot: usize,
    silent_slots: HashSet<usize>,
    inbox: VecDeque<MidiMessage>,
    sent: Vec<(Instant, Vec<u8>)>,
    notes: Vec<(u8, bool)>,
}

impl FakeDevice {
    fn new(programs: Vec<Program>) -> Self {
        Self {
            programs,
            active_slot: 0,
            silent_slots: HashSet::new(),
            inbox: VecDeque::new(),
            sent: Vec::new(),
            notes: Vec::new(),
        }
    }

    fn push(&mut self, message: MidiMessage) {
        self.inbox.push_back(message);
    }

    fn push_sysex(&mut self, data: &[u8]) {
        self.push(MidiMessage::SysEx { data: data.to_vec() });
    }

    /// Program frames written by the host, in order
    fn written_programs(&self) -> Vec<(Instant, Program)> {
        self.sent
            .iter()
            .filter(|(_, data)| data.len() >= 6 && data[3..6] == CMD_WRITE_PROGRAM)
            .map(|(at, data)| (*at, codec::decode_program(data).unwrap()))
            .collect()
    }

    fn frames_with_command(&self, command: &[u8]) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter(|(_, data)| data.get(3..3 + command.len()) == Some(command))
            .map(|(_, data)| data.clone())
            .collect()
    }
}

impl Transport for FakeDevice {
    fn send_sysex(&mut self, data: &[u8]) -> Result<()> {
        self.sent.push((Instant::now(), data.to_vec()));

        if data.len() == 7 && data[3..6] == [0x63, 0x00, 0x01] {
            let slot = data[6] as usize - 1;
            if !self.silent_slots.contains(&slot) {
                let mut frame = codec::encode_program(&self.programs[slot]).unwrap();
                frame[3..6].copy_from_slice(&CMD_DUMP_RESPONSE);
                self.push_sysex(&frame);
            }
        } else if data == codec::active_program_query().as_slice() {
            let reply = [0x47, 0x7F, 0x75, 0x64, 0x00, 0x01, self.active_slot as u8 + 1];
            self.push_sysex(&reply);
        }
        Ok(())
    }

    fn send_note(&mut self, note: u8, on: bool) -> Result<()> {
        self.notes.push((note, on));
        Ok(())
    }

    fn drain_pending(&mut self) -> Vec<TransportEvent> {
        self.inbox.drain(..).collect()
    }
}

/// Four programs without any shared trigger; pads latch and knobs are
/// narrowed so normalization is visible
fn unique_programs() -> Vec<Program> {
    (0..PROGRAM_COUNT)
        .map(|slot| {
            let mut program = Program::new(slot);
            for (i, pad) in program.pads.iter_mut().enumerate() {
                let n = (slot * 8 + i) as u8;
                *pad = Pad::new(36 + n, n, n, true);
            }
            for (i, knob) in program.knobs.iter_mut().enumerate() {
                *knob = Knob::new(64 + (slot * 8 + i) as u8, 10, 90);
            }
            program
        })
        .collect()
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        write_interval_ms: 0,
        dump_timeout_ms: 200,
        ..SessionConfig::default()
    }
}

fn connect(programs: Vec<Program>) -> DeviceSession<FakeDevice> {
    DeviceSession::connect(FakeDevice::new(programs), fast_config()).unwrap()
}

fn recorder() -> (TriggerCallback, Arc<Mutex<Vec<TriggerEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: TriggerCallback = Arc::new(move |event: &TriggerEvent| sink.lock().push(*event));
    (callback, seen)
}

fn assert_unambiguous(programs: &[Program]) {
    let pads: Vec<&Pad> = programs.iter().flat_map(|p| &p.pads).collect();
    let knobs: Vec<&Knob> = programs.iter().flat_map(|p| &p.knobs).collect();

    let notes: HashSet<u8> = pads.iter().map(|p| p.note).collect();
    let pcs: HashSet<u8> = pads.iter().map(|p| p.program_change).collect();
    let ccs: HashSet<u8> = pads
        .iter()
        .map(|p| p.control_change)
        .chain(knobs.iter().map(|k| k.control_change))
        .collect();

    assert_eq!(notes.len(), pads.len());
    assert_eq!(pcs.len(), pads.len());
    assert_eq!(ccs.len(), pads.len() + knobs.len());
}

#[test]
fn test_bootstrap_fetches_normalizes_and_writes_back() {
    let session = connect(unique_programs());
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.current_active_slot(), 0);

    let mut expected = unique_programs();
    for program in &mut expected {
        program.normalize();
    }
    for (slot, program) in expected.iter().enumerate() {
        assert_eq!(session.program(slot), Some(program));
    }

    let device = session.transport();
    let requests = device.frames_with_command(&[0x63, 0x00, 0x01]);
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[0], codec::dump_request(0).unwrap());
    assert_eq!(requests[3], codec::dump_request(3).unwrap());

    let written: Vec<Program> = device.written_programs().into_iter().map(|(_, p)| p).collect();
    assert_eq!(written, expected);

    // Program 1 is selected last
    let (_, last) = device.sent.last().unwrap();
    assert_eq!(last, &vec![0x47, 0x7F, 0x75, 0x62, 0x00, 0x00, 0x01, 0x00]);
}

#[test]
fn test_bootstrap_resolves_factory_defaults() {
    // Identity pads in every program, every CC and program change is 0
    let programs: Vec<Program> = (0..PROGRAM_COUNT).map(Program::new).collect();
    let session = connect(programs);

    let mirror: Vec<Program> = session.programs().iter().flatten().cloned().collect();
    assert_eq!(mirror.len(), PROGRAM_COUNT);
    assert_unambiguous(&mirror);
    assert!(session.check_ambiguity().unwrap().is_empty());

    // The fixed programs are what reached the hardware
    let written: Vec<Program> = session
        .transport()
        .written_programs()
        .into_iter()
        .map(|(_, p)| p)
        .collect();
    assert_eq!(written, mirror);
}

#[test]
fn test_bootstrap_without_autofix_reports_conflicts() {
    let mut programs = unique_programs();
    programs[2].pads[3].note = programs[0].pads[0].note;

    let config = SessionConfig {
        auto_fix_ambiguity: false,
        ..fast_config()
    };
    let result = DeviceSession::connect(FakeDevice::new(programs), config);

    match result {
        Err(Error::AmbiguityConflict(conflicts)) => {
            let controls: Vec<ControlRef> = conflicts.iter().map(|c| c.control).collect();
            assert_eq!(
                controls,
                vec![
                    ControlRef::Pad { program: 0, index: 0 },
                    ControlRef::Pad { program: 2, index: 3 },
                ]
            );
        }
        other => panic!("expected ambiguity conflict, got {:?}", other),
    }
}

#[test]
fn test_bootstrap_timeout() {
    let mut device = FakeDevice::new(unique_programs());
    device.silent_slots.insert(3);
    let config = SessionConfig {
        dump_timeout_ms: 30,
        ..fast_config()
    };

    let result = DeviceSession::connect(device, config);
    assert!(matches!(result, Err(Error::SetupTimeout { slot: 3 })));
}

#[test]
fn test_bootstrap_ignores_foreign_traffic() {
    let mut device = FakeDevice::new(unique_programs());
    device.push_sysex(&[0x7E, 0x7F, 0x06, 0x02, 0x00]);
    device.push(MidiMessage::NoteOn { channel: 0, note: 36, velocity: 100 });

    let session = DeviceSession::connect(device, fast_config()).unwrap();
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_pad_note_dispatch() {
    let mut session = connect(unique_programs());
    let note = session.program(0).unwrap().pads[2].note;

    let (callback, seen) = recorder();
    session
        .register_pad_callback(0, 2, callback, &[PadTrigger::Note])
        .unwrap();

    session.transport_mut().push(MidiMessage::NoteOn { channel: 6, note, velocity: 99 });
    session.tick(Duration::from_secs(60)).unwrap();

    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].program, 0);
        assert_eq!(seen[0].pad, Some(2));
        assert_eq!(seen[0].knob, None);
        assert_eq!(seen[0].value, Some(99));
        assert_eq!(seen[0].note_on, Some(note));
    }

    // A note nobody registered for
    session.transport_mut().push(MidiMessage::NoteOn { channel: 6, note: note + 1, velocity: 99 });
    session.tick(Duration::from_secs(60)).unwrap();
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn test_pad_triggers_and_unregister() {
    let mut session = connect(unique_programs());
    let pad = session.program(1).unwrap().pads[4];

    let (callback, seen) = recorder();
    session
        .register_pad_callback(1, 4, callback.clone(), &PadTrigger::ALL)
        .unwrap();

    session.transport_mut().push(MidiMessage::ControlChange { channel: 6, cc: pad.control_change, value: 7 });
    session.transport_mut().push(MidiMessage::ProgramChange { channel: 6, program: pad.program_change });
    session.tick(Duration::from_secs(60)).unwrap();

    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].control_change, Some(pad.control_change));
        assert_eq!(seen[0].value, Some(7));
        assert_eq!(seen[1].program_change, Some(pad.program_change));
    }

    session
        .unregister_pad_callback(1, 4, &callback, &PadTrigger::ALL)
        .unwrap();
    session.transport_mut().push(MidiMessage::ProgramChange { channel: 6, program: pad.program_change });
    session.tick(Duration::from_secs(60)).unwrap();
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn test_knob_dispatch() {
    let mut session = connect(unique_programs());
    let cc = session.program(3).unwrap().knobs[7].control_change;

    let (callback, seen) = recorder();
    session.register_knob_callback(3, 7, callback.clone()).unwrap();

    session.transport_mut().push(MidiMessage::ControlChange { channel: 6, cc, value: 127 });
    session.tick(Duration::from_secs(60)).unwrap();

    let event = seen.lock()[0];
    assert_eq!(event.program, 3);
    assert_eq!(event.knob, Some(7));
    assert_eq!(event.pad, None);
    assert_eq!(event.value, Some(127));

    session.unregister_knob_callback(3, 7, &callback).unwrap();
    // Unregistering again is harmless
    session.unregister_knob_callback(3, 7, &callback).unwrap();
}

#[test]
fn test_register_rejects_bad_indices() {
    let mut session = connect(unique_programs());
    let (callback, _) = recorder();

    assert!(matches!(
        session.register_pad_callback(4, 0, callback.clone(), &[PadTrigger::Note]),
        Err(Error::Range { .. })
    ));
    assert!(matches!(
        session.register_pad_callback(0, 8, callback.clone(), &[PadTrigger::Note]),
        Err(Error::Range { .. })
    ));
    assert!(matches!(
        session.register_knob_callback(0, 8, callback),
        Err(Error::Range { .. })
    ));
}

#[test]
fn test_active_slot_tracking() {
    let mut session = connect(unique_programs());
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    session.set_program_change_observer(move |slot| sink.lock().push(slot));

    session
        .transport_mut()
        .push_sysex(&[0x47, 0x7F, 0x75, 0x64, 0x00, 0x01, 0x02]);
    session.tick(Duration::from_secs(60)).unwrap();

    assert_eq!(session.current_active_slot(), 1);
    assert_eq!(*changes.lock(), vec![1]);

    // Same slot again: no notification
    session
        .transport_mut()
        .push_sysex(&[0x47, 0x7F, 0x75, 0x64, 0x00, 0x01, 0x02]);
    session.tick(Duration::from_secs(60)).unwrap();
    assert_eq!(*changes.lock(), vec![1]);
}

#[test]
fn test_tick_polls_active_program() {
    let mut session = connect(unique_programs());
    session.transport_mut().active_slot = 2;
    let query = codec::active_program_query();
    let queries = |s: &DeviceSession<FakeDevice>| {
        s.transport().sent.iter().filter(|(_, d)| *d == query).count()
    };

    // First tick is always due; the reply is consumed by the next one
    session.tick(Duration::from_secs(60)).unwrap();
    assert_eq!(queries(&session), 1);
    assert_eq!(session.current_active_slot(), 0);

    session.tick(Duration::from_secs(60)).unwrap();
    assert_eq!(queries(&session), 1);
    assert_eq!(session.current_active_slot(), 2);

    session.tick(Duration::ZERO).unwrap();
    assert_eq!(queries(&session), 2);
}

#[test]
fn test_steady_state_dump_updates_mirror() {
    let mut session = connect(unique_programs());
    let mut changed = session.program(1).unwrap().clone();
    changed.pads[0].note = 120;

    let mut frame = codec::encode_program(&changed).unwrap();
    frame[3..6].copy_from_slice(&CMD_DUMP_RESPONSE);
    session.transport_mut().push_sysex(&frame);
    // Foreign and truncated frames are dropped silently
    session.transport_mut().push_sysex(&frame[..20]);
    session.transport_mut().push_sysex(&[0x41, 0x10, 0x42]);
    session.tick(Duration::from_secs(60)).unwrap();

    assert_eq!(session.program(1), Some(&changed));
}

#[test]
fn test_set_pad_toggle() {
    let mut session = connect(unique_programs());
    let before = session.transport().written_programs().len();

    session.set_pad_toggle(2, 5, true).unwrap();

    assert!(session.program(2).unwrap().pads[5].toggle);
    let written = session.transport().written_programs();
    assert_eq!(written.len(), before + 1);
    let (_, program) = written.last().unwrap();
    assert_eq!(program.slot, 2);
    assert!(program.pads[5].toggle);
    assert!(!program.pads[4].toggle);
}

#[test]
fn test_range_errors_send_nothing() {
    let mut session = connect(unique_programs());
    let sent = session.transport().sent.len();

    assert!(matches!(session.set_pad_toggle(4, 0, true), Err(Error::Range { .. })));
    assert!(matches!(session.set_pad_toggle(0, 8, true), Err(Error::Range { .. })));
    assert!(matches!(session.set_active_program(4), Err(Error::Range { .. })));
    assert!(matches!(session.light_pad(8, true), Err(Error::Range { .. })));

    let mut bad = session.program(0).unwrap().clone();
    bad.pads[0].note = 128;
    assert!(matches!(session.write_program(bad), Err(Error::Encode { .. })));

    assert_eq!(session.transport().sent.len(), sent);
    assert!(session.transport().notes.is_empty());
    assert_eq!(session.program(0).unwrap().pads[0].note, 36);
}

#[test]
fn test_set_active_program_encoding() {
    let mut session = connect(unique_programs());
    session.set_active_program(2).unwrap();
    let (_, last) = session.transport().sent.last().unwrap();
    assert_eq!(last, &vec![0x47, 0x7F, 0x75, 0x62, 0x00, 0x00, 0x01, 0x02]);

    let config = SessionConfig {
        active_slot_encoding: ActiveSlotEncoding::OneBased,
        ..fast_config()
    };
    let mut session = DeviceSession::connect(FakeDevice::new(unique_programs()), config).unwrap();
    session.set_active_program(2).unwrap();
    let (_, last) = session.transport().sent.last().unwrap();
    assert_eq!(last[7], 0x03);
}

#[test]
fn test_light_pad_follows_active_program() {
    let mut session = connect(unique_programs());
    let sent = session.transport().sent.len();

    session.light_pad(3, true).unwrap();
    assert_eq!(session.transport().notes, vec![(39, true)]);

    session
        .transport_mut()
        .push_sysex(&[0x47, 0x7F, 0x75, 0x64, 0x00, 0x01, 0x02]);
    session.tick(Duration::from_secs(60)).unwrap();
    session.light_pad(3, false).unwrap();
    assert_eq!(session.transport().notes[1], (47, false));

    // Lighting pads never writes configuration (the tick sent one query)
    assert_eq!(session.transport().sent.len(), sent + 1);
}

#[test]
fn test_configuration_writes_are_paced() {
    let config = SessionConfig {
        dump_timeout_ms: 200,
        ..SessionConfig::default()
    };
    let mut session = DeviceSession::connect(FakeDevice::new(unique_programs()), config).unwrap();

    session.set_pad_toggle(0, 0, true).unwrap();
    session.set_pad_toggle(0, 1, true).unwrap();

    let interval = Duration::from_millis(300);
    let writes: Vec<Instant> = session
        .transport()
        .sent
        .iter()
        .filter(|(_, d)| d.get(3) == Some(&0x61) || d.get(3) == Some(&0x62))
        .map(|(at, _)| *at)
        .collect();

    // 4 programs + select during setup, then the two toggles
    assert_eq!(writes.len(), 7);
    for pair in writes.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= interval);
    }
}
