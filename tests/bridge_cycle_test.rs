mod common;

use common::{
    DEPTH, FIRE, FRAMES, METER, MODE, RecordingCore, RecordingUi, cycle, cycle_with, host_midi,
    position, running_bridge,
};
use plugin_bridge::bridge::STATE_QUEUE_DEPTH;
use plugin_bridge::host::MidiPortBuffer;
use plugin_bridge::tone::ToneGenerator;
use plugin_bridge::{Bridge, BridgeConfig, BridgeError};

fn settle(bridge: &mut plugin_bridge::BridgeUi) -> RecordingUi {
    let mut ui = RecordingUi::default();
    assert!(bridge.idle(&mut ui).expect("idle"));
    ui
}

#[test]
fn activation_announces_first_program_and_inputs() {
    let (bridge, mut bridge_ui) = running_bridge(RecordingCore::new(), &BridgeConfig::default());
    let ui = settle(&mut bridge_ui);

    assert_eq!(ui.programs, vec![0]);
    assert_eq!(ui.changes, vec![(DEPTH, 1.0), (MODE, 0.0), (FIRE, 0.0)]);
    assert_eq!(
        &bridge.core().calls[..4],
        &["sample_rate 48000", "buffer_size 64", "program 0", "activate"]
    );
    assert_eq!(bridge.status().program, Some(0));
}

#[test]
fn mapped_cc_sets_the_scaled_value_and_is_consumed() {
    let (mut bridge, mut bridge_ui) = running_bridge(RecordingCore::new(), &BridgeConfig::default());
    let mut ui = settle(&mut bridge_ui);
    ui.take();

    cycle(&mut bridge, &host_midi(&[(0, &[0xB0, 1, 64])]));

    let expected = (64.0f32 / 127.0) * 10.0;
    let run = bridge.core().runs.last().expect("one run");
    assert!(run.midi.is_empty());
    assert!((run.values[DEPTH as usize] - expected).abs() < 1e-5);
    assert_eq!(run.values[MODE as usize], 0.0);
    assert_eq!(bridge.status().intercepted, 1);

    bridge_ui.idle(&mut ui).expect("idle");
    assert!(ui.saw(DEPTH, expected));
}

#[test]
fn forwarding_config_passes_intercepted_cc_to_the_core() {
    let mut config = BridgeConfig::default();
    config.midi.forward_intercepted = true;
    let (mut bridge, _ui) = running_bridge(RecordingCore::new(), &config);

    cycle(&mut bridge, &host_midi(&[(3, &[0xB0, 1, 127])]));

    let run = bridge.core().runs.last().expect("one run");
    assert_eq!(run.midi, vec![(3, vec![0xB0, 1, 127])]);
    assert_eq!(run.values[DEPTH as usize], 10.0);
}

#[test]
fn ui_notes_arrive_ahead_of_host_midi() {
    let (mut bridge, mut bridge_ui) = running_bridge(RecordingCore::new(), &BridgeConfig::default());
    assert!(bridge_ui.host_mut().send_note(0, 60, 100));
    assert!(bridge_ui.host_mut().send_note(2, 60, 0));

    cycle(&mut bridge, &host_midi(&[(5, &[0x91, 64, 90])]));

    let run = bridge.core().runs.last().expect("one run");
    assert_eq!(
        run.midi,
        vec![
            (0, vec![0x90, 60, 100]),
            (0, vec![0x82, 60, 0]),
            (5, vec![0x91, 64, 90]),
        ]
    );
}

#[test]
fn cycle_takes_at_most_512_events() {
    let (mut bridge, _ui) = running_bridge(RecordingCore::new(), &BridgeConfig::default());
    let mut input = MidiPortBuffer::with_capacity(1024, 8192);
    for n in 0..600u32 {
        assert!(input.push(n % FRAMES, &[0x90, (n % 128) as u8, 1]));
    }

    cycle(&mut bridge, &input);

    assert_eq!(bridge.core().runs[0].midi.len(), 512);
    assert_eq!(bridge.status().midi_events_dropped, 88);
}

#[test]
fn program_change_is_loaded_and_announced() {
    let (mut bridge, mut bridge_ui) = running_bridge(RecordingCore::new(), &BridgeConfig::default());
    let mut ui = settle(&mut bridge_ui);
    ui.take();

    cycle(&mut bridge, &host_midi(&[(0, &[0xC0, 1]), (1, &[0xC0, 2])]));

    assert!(bridge.core().calls.iter().any(|c| c == "program 1"));
    assert!(!bridge.core().calls.iter().any(|c| c == "program 2"));
    assert_eq!(bridge.core().runs[0].midi, vec![(1, vec![0xC0, 2])]);
    assert_eq!(bridge.status().program, Some(1));
    assert_eq!(bridge.status().program_changes, 1);

    bridge_ui.idle(&mut ui).expect("idle");
    assert_eq!(ui.programs, vec![0, 1]);
    assert!(ui.saw(DEPTH, 7.0));
    assert!(ui.saw(MODE, 1.0));
}

#[test]
fn only_the_latest_program_reaches_the_ui_between_polls() {
    let (mut bridge, mut bridge_ui) = running_bridge(RecordingCore::new(), &BridgeConfig::default());
    let mut ui = settle(&mut bridge_ui);
    assert_eq!(ui.programs, vec![0]);

    cycle(&mut bridge, &host_midi(&[(0, &[0xC0, 0])]));
    cycle(&mut bridge, &host_midi(&[(0, &[0xC0, 1])]));
    bridge_ui.idle(&mut ui).expect("idle");

    assert_eq!(ui.programs, vec![0, 1]);
    assert_eq!(bridge.status().program_changes, 2);
    assert_eq!(bridge.status().program, Some(1));
}

#[test]
fn fired_trigger_is_reset_before_the_core_runs() {
    let (mut bridge, mut bridge_ui) = running_bridge(RecordingCore::new(), &BridgeConfig::default());
    let mut ui = settle(&mut bridge_ui);
    ui.take();
    assert_eq!(bridge_ui.host().set_parameter_value(FIRE, 1.0).expect("fire"), 1.0);

    cycle(&mut bridge, &MidiPortBuffer::default());

    let calls = &bridge.core().calls;
    let tail: Vec<&str> = calls[calls.len() - 3..].iter().map(String::as_str).collect();
    assert_eq!(tail, vec!["set 2 1", "set 2 0", "run"]);
    assert_eq!(bridge.core().runs[0].values[FIRE as usize], 0.0);

    bridge_ui.idle(&mut ui).expect("idle");
    assert_eq!(ui.take(), vec![(FIRE, 0.0)]);
}

#[test]
fn ui_requests_reach_the_core_without_echo() {
    let (mut bridge, mut bridge_ui) = running_bridge(RecordingCore::new(), &BridgeConfig::default());
    let mut ui = settle(&mut bridge_ui);
    ui.take();

    bridge_ui.host().set_parameter_value(DEPTH, 2.0).expect("depth");
    bridge_ui.host().set_parameter_value(DEPTH, 3.0).expect("depth");
    assert!(matches!(
        bridge_ui.host().set_parameter_value(METER, 1.0),
        Err(BridgeError::OutputParameter(3))
    ));
    cycle(&mut bridge, &MidiPortBuffer::default());

    assert_eq!(bridge.core().runs[0].values[DEPTH as usize], 3.0);
    assert_eq!(bridge_ui.host().parameter_value(DEPTH), Some(3.0));
    assert_eq!(bridge.status().rejected_requests, 1);

    bridge_ui.idle(&mut ui).expect("idle");
    assert!(ui.changes.is_empty());
}

#[test]
fn core_requests_are_applied_or_rejected() {
    let mut core = RecordingCore::new();
    core.requests_per_run = vec![(MODE, 2.0), (METER, 0.5), (9, 1.0)];
    let (mut bridge, mut bridge_ui) = running_bridge(core, &BridgeConfig::default());
    let mut ui = settle(&mut bridge_ui);
    ui.take();

    cycle(&mut bridge, &MidiPortBuffer::default());

    assert_eq!(bridge.core().values[MODE as usize], 2.0);
    assert_eq!(bridge.core().values[METER as usize], 0.0);
    assert_eq!(bridge.status().rejected_requests, 2);

    bridge_ui.idle(&mut ui).expect("idle");
    assert_eq!(ui.take(), vec![(MODE, 2.0)]);
}

#[test]
fn output_parameters_are_reported_when_they_move() {
    let (mut bridge, mut bridge_ui) = running_bridge(RecordingCore::new(), &BridgeConfig::default());
    let mut ui = settle(&mut bridge_ui);
    ui.take();

    let notes = host_midi(&[(0, &[0x90, 1, 1]), (1, &[0x90, 2, 1]), (2, &[0x90, 3, 1])]);
    cycle(&mut bridge, &notes);
    bridge_ui.idle(&mut ui).expect("idle");
    assert_eq!(ui.take(), vec![(METER, 3.0)]);

    cycle(&mut bridge, &notes);
    bridge_ui.idle(&mut ui).expect("idle");
    assert!(ui.take().is_empty());

    cycle(&mut bridge, &MidiPortBuffer::default());
    bridge_ui.idle(&mut ui).expect("idle");
    assert_eq!(ui.take(), vec![(METER, 0.0)]);
}

#[test]
fn state_changes_are_applied_in_batches_and_recycled() {
    let (mut bridge, mut bridge_ui) = running_bridge(RecordingCore::new(), &BridgeConfig::default());
    let host = bridge_ui.host_mut();
    for n in 0..STATE_QUEUE_DEPTH {
        host.set_state("key", &n.to_string()).expect("queue has room");
    }
    assert!(matches!(
        host.set_state("key", "overflow"),
        Err(BridgeError::StateQueueFull)
    ));

    cycle(&mut bridge, &MidiPortBuffer::default());
    assert_eq!(bridge.core().states.len(), 4);
    assert_eq!(bridge.core().states[0], ("key".to_string(), "0".to_string()));
    assert_eq!(bridge_ui.host_mut().recycle(), 4);

    for _ in 0..3 {
        cycle(&mut bridge, &MidiPortBuffer::default());
    }
    assert_eq!(bridge.core().states.len(), STATE_QUEUE_DEPTH);
    assert_eq!(bridge.core().states[15].1, "15");
    assert_eq!(bridge.status().state_changes, STATE_QUEUE_DEPTH as u64);
}

#[test]
fn state_values_are_read_back_from_the_core() {
    let (mut bridge, mut bridge_ui) =
        Bridge::new(ToneGenerator::new(), &BridgeConfig::default()).expect("bridge");
    bridge.activate(48_000.0, FRAMES).expect("activate");
    assert_eq!(bridge.state("a4").as_deref(), Some("440.0"));
    assert_eq!(bridge.state("tuning"), None);

    bridge_ui.host_mut().set_state("a4", "432").expect("queue has room");
    cycle(&mut bridge, &MidiPortBuffer::default());

    assert_eq!(bridge.state("a4").as_deref(), Some("432.0"));
    assert_eq!(bridge.status().state_changes, 1);
}

#[test]
fn midi_output_is_cleared_then_written_by_the_core() {
    let mut core = RecordingCore::new();
    core.thru = true;
    let (mut bridge, _ui) = running_bridge(core, &BridgeConfig::default());
    let mut out = MidiPortBuffer::with_capacity(64, 1024);
    assert!(out.push(0, &[0xF8]));

    let input = host_midi(&[(7, &[0x90, 40, 80])]);
    cycle_with(&mut bridge, &input, &mut out, position(1));

    let written: Vec<(u32, Vec<u8>)> = out.iter().map(|e| (e.time, e.bytes.to_vec())).collect();
    assert_eq!(written, vec![(7, vec![0x90, 40, 80])]);
}

#[test]
fn inactive_bridge_outputs_silence() {
    let (mut bridge, _ui) =
        Bridge::new(RecordingCore::new(), &BridgeConfig::default()).expect("bridge");

    let [left, right] = cycle(&mut bridge, &host_midi(&[(0, &[0x90, 1, 1])]));

    assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    assert!(bridge.core().runs.is_empty());
    assert_eq!(bridge.status().cycles, 0);
}

#[test]
fn inactive_bridge_clears_stale_midi_output() {
    let (mut bridge, _ui) =
        Bridge::new(RecordingCore::new(), &BridgeConfig::default()).expect("bridge");
    let mut out = MidiPortBuffer::with_capacity(64, 1024);
    assert!(out.push(0, &[0x90, 60, 100]));

    cycle_with(&mut bridge, &MidiPortBuffer::default(), &mut out, position(1));

    assert!(out.is_empty());
}

#[test]
fn running_bridge_lets_the_core_fill_outputs() {
    let (mut bridge, _ui) = running_bridge(RecordingCore::new(), &BridgeConfig::default());
    let [left, _] = cycle(&mut bridge, &MidiPortBuffer::default());
    assert!(left.iter().all(|&s| s == 0.25));
    assert_eq!(bridge.core().runs[0].frames, FRAMES);
    assert_eq!(bridge.status().cycles, 1);
}

#[test]
fn torn_transport_snapshot_is_counted_and_sanitized() {
    let (mut bridge, _ui) = running_bridge(RecordingCore::new(), &BridgeConfig::default());
    let mut out = MidiPortBuffer::default();

    cycle_with(&mut bridge, &MidiPortBuffer::default(), &mut out, position(3));
    let steady = bridge.core().runs[0].position.expect("position");
    assert_eq!(steady.frame, 3 * u64::from(FRAMES));
    assert!(steady.bbt.valid);

    let mut torn = position(4);
    torn.unique_2 = 5;
    cycle_with(&mut bridge, &MidiPortBuffer::default(), &mut out, torn);
    let sanitized = bridge.core().runs[1].position.expect("position");
    assert_eq!(sanitized.frame, 0);
    assert!(!sanitized.bbt.valid);
    assert_eq!(bridge.status().invalid_positions, 1);
}
