//! Host transport snapshots and their canonical form.
use bitflags::bitflags;

bitflags! {
    /// Optional sections present in a [`HostPosition`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PositionFlags: u32 {
        /// Bar, beat and tick fields are filled in.
        const BBT = 0x10;
        /// `tick_double` carries a fractional tick.
        const TICK_DOUBLE = 0x200;
    }
}

/// Transport snapshot as the host reports it.
///
/// The host bumps `unique_1` before and `unique_2` after rewriting the snapshot, so unequal
/// markers mean the copy was taken mid-update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HostPosition {
    /// Marker written before the snapshot body.
    pub unique_1: u64,
    /// Marker written after the snapshot body.
    pub unique_2: u64,
    /// Whether the transport is rolling.
    pub rolling: bool,
    /// Current sample frame.
    pub frame: u64,
    /// Present optional sections.
    pub valid: PositionFlags,
    /// Current bar, starting at 1.
    pub bar: i32,
    /// Current beat within the bar, starting at 1.
    pub beat: i32,
    /// Current tick within the beat.
    pub tick: i32,
    /// Fractional tick, when [`PositionFlags::TICK_DOUBLE`] is set.
    pub tick_double: f64,
    /// Ticks elapsed before the current bar.
    pub bar_start_tick: f64,
    /// Time signature numerator.
    pub beats_per_bar: f32,
    /// Time signature denominator.
    pub beat_type: f32,
    /// Tick resolution.
    pub ticks_per_beat: f64,
    /// Tempo.
    pub beats_per_minute: f64,
}

impl HostPosition {
    /// Whether the snapshot was copied without the host rewriting it.
    pub fn is_consistent(&self) -> bool {
        self.unique_1 == self.unique_2
    }
}

/// Musical position block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarBeatTick {
    /// Whether the remaining fields can be trusted.
    pub valid: bool,
    /// Current bar, starting at 1.
    pub bar: i32,
    /// Current beat within the bar, starting at 1.
    pub beat: i32,
    /// Current tick within the beat, possibly fractional.
    pub tick: f64,
    /// Ticks elapsed before the current bar.
    pub bar_start_tick: f64,
    /// Time signature numerator.
    pub beats_per_bar: f32,
    /// Time signature denominator.
    pub beat_type: f32,
    /// Tick resolution.
    pub ticks_per_beat: f64,
    /// Tempo.
    pub beats_per_minute: f64,
}

impl Default for BarBeatTick {
    fn default() -> Self {
        Self {
            valid: false,
            bar: 1,
            beat: 1,
            tick: 0.0,
            bar_start_tick: 0.0,
            beats_per_bar: 4.0,
            beat_type: 4.0,
            ticks_per_beat: 1920.0,
            beats_per_minute: 120.0,
        }
    }
}

/// Position handed to the DSP core each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimePosition {
    /// Whether the host transport is rolling.
    pub playing: bool,
    /// Current sample frame, 0 when the snapshot was torn.
    pub frame: u64,
    /// Musical position.
    pub bbt: BarBeatTick,
}

/// Converts host snapshots into [`TimePosition`]s.
///
/// Fields the host stops reporting keep their last value with `valid` cleared.
#[derive(Debug, Default)]
pub struct TimePositionTranslator {
    position: TimePosition,
}

impl TimePositionTranslator {
    /// Translator starting from the default position.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `snapshot` into the canonical position.
    pub fn translate(&mut self, snapshot: &HostPosition) -> &TimePosition {
        let position = &mut self.position;
        position.playing = snapshot.rolling;

        if !snapshot.is_consistent() {
            position.frame = 0;
            position.bbt.valid = false;
            return position;
        }

        position.frame = snapshot.frame;

        if !snapshot.valid.contains(PositionFlags::BBT) {
            position.bbt.valid = false;
            return position;
        }

        let bbt = &mut position.bbt;
        bbt.valid = true;
        bbt.bar = snapshot.bar;
        bbt.beat = snapshot.beat;
        bbt.tick = if snapshot.valid.contains(PositionFlags::TICK_DOUBLE) {
            snapshot.tick_double
        } else {
            f64::from(snapshot.tick)
        };
        bbt.bar_start_tick = snapshot.bar_start_tick;
        bbt.beats_per_bar = snapshot.beats_per_bar;
        bbt.beat_type = snapshot.beat_type;
        bbt.ticks_per_beat = snapshot.ticks_per_beat;
        bbt.beats_per_minute = snapshot.beats_per_minute;
        position
    }
}

/// Steady-tempo transport used by the clock host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedTransport {
    /// Whether the transport rolls.
    pub rolling: bool,
    /// Tempo.
    pub beats_per_minute: f64,
    /// Time signature numerator.
    pub beats_per_bar: f32,
    /// Time signature denominator.
    pub beat_type: f32,
    /// Tick resolution.
    pub ticks_per_beat: f64,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self {
            rolling: true,
            beats_per_minute: 120.0,
            beats_per_bar: 4.0,
            beat_type: 4.0,
            ticks_per_beat: 1920.0,
        }
    }
}

impl SimulatedTransport {
    /// Snapshot for `frame` at `sample_rate`, tagged with sequence number `sequence`.
    pub fn snapshot(&self, frame: u64, sample_rate: f64, sequence: u64) -> HostPosition {
        let mut position = HostPosition {
            unique_1: sequence,
            unique_2: sequence,
            rolling: self.rolling,
            frame,
            ..HostPosition::default()
        };
        if sample_rate <= 0.0 || self.beats_per_minute <= 0.0 || self.beats_per_bar <= 0.0 {
            return position;
        }

        let beats = frame as f64 / sample_rate * self.beats_per_minute / 60.0;
        let beats_per_bar = f64::from(self.beats_per_bar);
        let bars = (beats / beats_per_bar).floor();
        let beat_in_bar = beats - bars * beats_per_bar;
        let tick = beat_in_bar.fract() * self.ticks_per_beat;

        position.valid = PositionFlags::BBT | PositionFlags::TICK_DOUBLE;
        position.bar = bars as i32 + 1;
        position.beat = beat_in_bar.floor() as i32 + 1;
        position.tick = tick as i32;
        position.tick_double = tick;
        position.bar_start_tick = bars * beats_per_bar * self.ticks_per_beat;
        position.beats_per_bar = self.beats_per_bar;
        position.beat_type = self.beat_type;
        position.ticks_per_beat = self.ticks_per_beat;
        position.beats_per_minute = self.beats_per_minute;
        position
    }
}
