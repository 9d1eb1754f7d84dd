//! Table-driven blinking of the three chest-box slot LEDs.
//!
//! A [`Sequence`] is a cyclic list of steps; each step names the slots lit
//! during it. The [`LedSequencer`] walks the sequence forever, one step after
//! the other, until its [`StopToken`] is triggered.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    platform::{Gpio, Level},
    timeline::seconds,
    Clock, Result, StopToken, VaderError,
};

/// One of the three slot LEDs on the control box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotLabel {
    Top,
    Middle,
    Bottom,
}

impl SlotLabel {
    pub const ALL: [SlotLabel; 3] = [SlotLabel::Top, SlotLabel::Middle, SlotLabel::Bottom];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Middle => "middle",
            Self::Bottom => "bottom",
        }
    }

    /// Identifier of the GPIO channel driving this slot.
    pub fn channel_id(self) -> &'static str {
        match self {
            Self::Top => "top_led",
            Self::Middle => "middle_led",
            Self::Bottom => "bottom_led",
        }
    }
}

impl FromStr for SlotLabel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "top" => Ok(Self::Top),
            "middle" => Ok(Self::Middle),
            "bottom" => Ok(Self::Bottom),
            other => Err(format!("unknown slot label `{other}` (choose from top, middle, bottom)")),
        }
    }
}

impl fmt::Display for SlotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slots lit during one step. Empty means every slot stays off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceStep {
    lit: Vec<SlotLabel>,
}

impl SequenceStep {
    /// Duplicated labels are kept once, in first-seen order.
    pub fn new(labels: impl IntoIterator<Item = SlotLabel>) -> Self {
        let mut lit = Vec::with_capacity(SlotLabel::ALL.len());
        for label in labels {
            if !lit.contains(&label) {
                lit.push(label);
            }
        }
        Self { lit }
    }

    pub fn lit(&self) -> &[SlotLabel] {
        &self.lit
    }

    pub fn is_empty(&self) -> bool {
        self.lit.is_empty()
    }
}

/// Built-in patterns, named after Vader's state of mind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedSequence {
    Action,
    Calm,
}

impl NamedSequence {
    pub const NAMES: [&'static str; 2] = ["action", "calm"];

    fn table(self) -> &'static [&'static [SlotLabel]] {
        match self {
            Self::Action => ACTION,
            Self::Calm => CALM,
        }
    }
}

const T: SlotLabel = SlotLabel::Top;
const M: SlotLabel = SlotLabel::Middle;
const B: SlotLabel = SlotLabel::Bottom;

const ACTION: &[&[SlotLabel]] = &[
    &[T, M, B],
    &[T, B],
    &[T, M, B],
    &[T],
    &[],
    &[T, M, B],
    &[T],
    &[T, M, B],
    &[M, B],
    &[],
    &[T, B],
    &[T, M, B],
    &[T, B],
    &[],
    &[T],
    &[],
];

const CALM: &[&[SlotLabel]] = &[
    &[M],
    &[T],
    &[M],
    &[T],
    &[M],
    &[T],
    &[T],
    &[],
    &[B],
    &[],
];

impl FromStr for NamedSequence {
    type Err = VaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "action" => Ok(Self::Action),
            "calm" => Ok(Self::Calm),
            _ => Err(VaderError::sequence(
                format!("`{s}`"),
                format!("unknown sequence name (choose from {})", Self::NAMES.join(", ")),
            )),
        }
    }
}

/// Sequence as written in the configuration: a built-in name or a literal
/// list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SequenceSpec {
    Named(String),
    Custom(Vec<Vec<String>>),
}

impl SequenceSpec {
    pub fn describe(&self) -> String {
        match self {
            Self::Named(name) => format!("`{name}`"),
            Self::Custom(steps) => format!("{steps:?}"),
        }
    }
}

impl Default for SequenceSpec {
    fn default() -> Self {
        Self::Named("action".to_string())
    }
}

/// Non-empty cyclic list of steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    steps: Vec<SequenceStep>,
}

impl Sequence {
    pub fn new(steps: Vec<SequenceStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(VaderError::sequence("[]", "a sequence needs at least one step"));
        }
        Ok(Self { steps })
    }

    pub fn named(name: NamedSequence) -> Self {
        let steps = name
            .table()
            .iter()
            .map(|labels| SequenceStep::new(labels.iter().copied()))
            .collect();
        Self { steps }
    }

    /// Resolves a configured sequence once, before the sequencer starts.
    pub fn resolve(spec: &SequenceSpec) -> Result<Self> {
        match spec {
            SequenceSpec::Named(name) => Ok(Self::named(name.parse()?)),
            SequenceSpec::Custom(raw) => {
                let steps = raw
                    .iter()
                    .map(|labels| {
                        labels
                            .iter()
                            .map(|label| label.parse::<SlotLabel>())
                            .collect::<std::result::Result<Vec<_>, _>>()
                            .map(SequenceStep::new)
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|reason| VaderError::sequence(spec.describe(), reason))?;
                Self::new(steps).map_err(|_| {
                    VaderError::sequence(spec.describe(), "a sequence needs at least one step")
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Step at `index`, wrapping around the end of the sequence.
    pub fn step(&self, index: usize) -> &SequenceStep {
        &self.steps[index % self.steps.len()]
    }
}

/// GPIO lines of the three slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLines {
    pub top: u32,
    pub middle: u32,
    pub bottom: u32,
}

impl SlotLines {
    pub fn line(&self, label: SlotLabel) -> u32 {
        match label {
            SlotLabel::Top => self.top,
            SlotLabel::Middle => self.middle,
            SlotLabel::Bottom => self.bottom,
        }
    }
}

/// Per-step durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerTiming {
    /// How long the lit slots of a step stay on. Also the whole length of an
    /// empty step.
    pub time_per_step: Duration,
    /// All-off pause after a non-empty step.
    pub delay_between_steps: Duration,
}

impl SequencerTiming {
    pub fn from_seconds(time_per_step: f64, delay_between_steps: f64) -> Self {
        Self {
            time_per_step: seconds(time_per_step),
            delay_between_steps: seconds(delay_between_steps),
        }
    }

    /// Longest time a single step can take.
    pub fn step_period(&self) -> Duration {
        self.time_per_step.saturating_add(self.delay_between_steps)
    }
}

impl Default for SequencerTiming {
    fn default() -> Self {
        Self::from_seconds(0.4, 0.4)
    }
}

/// Drives the slot LEDs through a [`Sequence`].
pub struct LedSequencer {
    sequence: Sequence,
    lines: SlotLines,
    timing: SequencerTiming,
    gpio: Arc<dyn Gpio>,
    clock: Arc<dyn Clock>,
}

impl LedSequencer {
    pub fn new(
        sequence: Sequence,
        lines: SlotLines,
        timing: SequencerTiming,
        gpio: Arc<dyn Gpio>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sequence,
            lines,
            timing,
            gpio,
            clock,
        }
    }

    /// Lights the slots of step `index`, holds them, then clears all three and
    /// pauses. Empty steps only hold.
    pub fn run_step(&self, index: usize) -> Result<()> {
        let step = self.sequence.step(index);
        for &label in step.lit() {
            self.set(label, Level::High)?;
        }
        self.clock.sleep(self.timing.time_per_step);

        if !step.is_empty() {
            for label in SlotLabel::ALL {
                self.set(label, Level::Low)?;
            }
            self.clock.sleep(self.timing.delay_between_steps);
        }
        Ok(())
    }

    /// Cycles through the sequence from index 0 until `stop` is requested.
    ///
    /// The token is checked after every step, so stopping takes at most one
    /// step period and never interrupts a step halfway.
    pub fn run(&self, stop: &StopToken) -> Result<()> {
        let mut index = 0usize;
        loop {
            self.run_step(index)?;
            index = (index + 1) % self.sequence.len();
            if stop.is_requested() {
                break;
            }
        }
        tracing::debug!("slot LED sequence stopped");
        Ok(())
    }

    fn set(&self, label: SlotLabel, level: Level) -> Result<()> {
        let line = self.lines.line(label);
        self.gpio.write(line, level).map_err(|e| {
            VaderError::SequencerFault(format!("{label} slot LED (line {line}): {e}"))
        })
    }
}

impl fmt::Debug for LedSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedSequencer")
            .field("sequence", &self.sequence)
            .field("lines", &self.lines)
            .field("timing", &self.timing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::sim::{GpioWrite, SimulatedGpio},
        ManualClock,
    };

    const LINES: SlotLines = SlotLines {
        top: 10,
        middle: 9,
        bottom: 11,
    };

    /// Virtual clock that requests a stop once `deadline` is reached.
    struct StopAt {
        inner: ManualClock,
        deadline: Duration,
        stop: StopToken,
    }

    impl Clock for StopAt {
        fn now(&self) -> Duration {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);
            if self.inner.now() >= self.deadline {
                self.stop.request();
            }
        }
    }

    fn custom(steps: &[&[&str]]) -> SequenceSpec {
        SequenceSpec::Custom(
            steps
                .iter()
                .map(|step| step.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    fn rig(deadline: Duration) -> (Arc<StopAt>, Arc<SimulatedGpio>, StopToken) {
        let stop = StopToken::new();
        let clock = Arc::new(StopAt {
            inner: ManualClock::new(),
            deadline,
            stop: stop.clone(),
        });
        let gpio = Arc::new(SimulatedGpio::with_clock(clock.clone()));
        for line in [LINES.top, LINES.middle, LINES.bottom] {
            gpio.setup_output(line).unwrap();
        }
        (clock, gpio, stop)
    }

    fn secs(write: &GpioWrite) -> f64 {
        write.at.as_secs_f64()
    }

    #[test]
    fn resolves_named_sequences_case_insensitively() {
        let action = Sequence::resolve(&SequenceSpec::Named("Action".into())).unwrap();
        assert_eq!(action.len(), 16);
        let calm = Sequence::resolve(&SequenceSpec::Named("calm".into())).unwrap();
        assert_eq!(calm.len(), 10);
        assert_eq!(calm.step(0).lit(), &[SlotLabel::Middle]);
    }

    #[test]
    fn rejects_unknown_names_and_labels() {
        let err = Sequence::resolve(&SequenceSpec::Named("angry".into())).unwrap_err();
        assert!(matches!(err, VaderError::InvalidSequence { .. }));
        assert!(err.to_string().contains("angry"));

        let err = Sequence::resolve(&custom(&[&["top", "left"]])).unwrap_err();
        assert!(err.to_string().contains("left"));

        assert!(Sequence::resolve(&custom(&[])).is_err());
    }

    #[test]
    fn step_index_wraps_modulo_length() {
        let sequence = Sequence::resolve(&custom(&[&["top"], &[], &["bottom"]])).unwrap();
        let visited: Vec<_> = (0..7).map(|i| sequence.step(i).clone()).collect();
        assert_eq!(visited[3], visited[0]);
        assert_eq!(visited[5], visited[2]);
        assert_eq!(visited[6].lit(), &[SlotLabel::Top]);
    }

    #[test]
    fn single_step_sequence_repeats_itself() {
        let sequence = Sequence::resolve(&custom(&[&["middle"]])).unwrap();
        assert_eq!(sequence.step(41), sequence.step(0));
    }

    #[test]
    fn deserializes_both_spec_shapes() {
        let named: SequenceSpec = serde_json::from_str("\"calm\"").unwrap();
        assert_eq!(named, SequenceSpec::Named("calm".into()));
        let custom: SequenceSpec = serde_json::from_str("[[\"top\", \"bottom\"], []]").unwrap();
        assert!(matches!(custom, SequenceSpec::Custom(ref steps) if steps.len() == 2));
    }

    #[test]
    fn follows_the_documented_timeline() {
        let (clock, gpio, stop) = rig(Duration::from_secs_f64(2.4));
        let sequence =
            Sequence::resolve(&custom(&[&["top", "bottom"], &[], &["middle"], &[]])).unwrap();
        let sequencer = LedSequencer::new(
            sequence,
            LINES,
            SequencerTiming::from_seconds(0.4, 0.4),
            gpio.clone(),
            clock.clone(),
        );

        sequencer.run(&stop).unwrap();

        let writes = gpio.writes();
        let expected = [
            (0.0, LINES.top, Level::High),
            (0.0, LINES.bottom, Level::High),
            (0.4, LINES.top, Level::Low),
            (0.4, LINES.middle, Level::Low),
            (0.4, LINES.bottom, Level::Low),
            (1.2, LINES.middle, Level::High),
            (1.6, LINES.top, Level::Low),
            (1.6, LINES.middle, Level::Low),
            (1.6, LINES.bottom, Level::Low),
        ];
        assert_eq!(writes.len(), expected.len());
        for (write, (at, line, level)) in writes.iter().zip(expected) {
            assert!((secs(write) - at).abs() < 1e-6, "{write:?} expected at {at}");
            assert_eq!(write.line, line);
            assert_eq!(write.level, level);
        }
        assert!((clock.now().as_secs_f64() - 2.4).abs() < 1e-6);
    }

    #[test]
    fn empty_steps_last_exactly_time_per_step() {
        let (clock, gpio, _stop) = rig(Duration::MAX);
        let sequence = Sequence::resolve(&custom(&[&[]])).unwrap();
        let sequencer = LedSequencer::new(
            sequence,
            LINES,
            SequencerTiming::from_seconds(0.3, 0.5),
            gpio.clone(),
            clock.clone(),
        );

        sequencer.run_step(0).unwrap();
        assert_eq!(clock.now(), Duration::from_secs_f64(0.3));
        assert!(gpio.writes().is_empty());
    }

    #[test]
    fn lit_steps_end_with_every_slot_off() {
        let (clock, gpio, _stop) = rig(Duration::MAX);
        let sequence = Sequence::named(NamedSequence::Action);
        let timing = SequencerTiming::from_seconds(0.2, 0.1);
        let sequencer = LedSequencer::new(sequence, LINES, timing, gpio.clone(), clock.clone());

        sequencer.run_step(0).unwrap();
        assert_eq!(clock.now(), timing.step_period());
        for line in [LINES.top, LINES.middle, LINES.bottom] {
            assert_eq!(gpio.level(line), Some(Level::Low));
        }
    }

    #[test]
    fn stop_before_start_still_finishes_one_step() {
        let (clock, gpio, stop) = rig(Duration::MAX);
        stop.request();
        let sequence = Sequence::resolve(&custom(&[&["top"], &["bottom"]])).unwrap();
        let sequencer = LedSequencer::new(
            sequence,
            LINES,
            SequencerTiming::from_seconds(0.4, 0.4),
            gpio.clone(),
            clock.clone(),
        );

        sequencer.run(&stop).unwrap();
        assert!(gpio
            .writes_to(LINES.bottom)
            .iter()
            .all(|write| write.level == Level::Low));
        assert!((clock.now().as_secs_f64() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn write_failures_become_sequencer_faults() {
        let (clock, gpio, stop) = rig(Duration::MAX);
        gpio.fail_writes_to(LINES.middle);
        let sequencer = LedSequencer::new(
            Sequence::named(NamedSequence::Calm),
            LINES,
            SequencerTiming::default(),
            gpio,
            clock,
        );

        let err = sequencer.run(&stop).unwrap_err();
        assert!(matches!(err, VaderError::SequencerFault(ref msg) if msg.contains("middle")));
    }
}
