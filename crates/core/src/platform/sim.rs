//! In-memory backends that behave like the real devices.
//!
//! They record everything they are asked to do, which makes them the test
//! double for the whole engine as well as the dry-run backend of the app.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;

use super::{
    AudioBackend, AudioChannelId, Gpio, Level, PlatformError, PlatformResult, Repeat, SampleId,
};
use crate::{Clock, SystemClock};

/// Highest line number on a Raspberry Pi header (BCM numbering).
pub const MAX_LINE: u32 = 27;

/// Configured direction of a simulated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Output,
    InputPullUp,
}

/// One recorded output write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpioWrite {
    pub at: Duration,
    pub line: u32,
    pub level: Level,
}

#[derive(Debug)]
struct LineState {
    mode: PinMode,
    level: Level,
    taps: usize,
}

#[derive(Debug, Default)]
struct GpioState {
    lines: HashMap<u32, LineState>,
    writes: Vec<GpioWrite>,
    failing: HashSet<u32>,
    cleaned_up: bool,
}

/// Simulated GPIO header.
pub struct SimulatedGpio {
    clock: Arc<dyn Clock>,
    state: Mutex<GpioState>,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Timestamps writes with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(GpioState::default()),
        }
    }

    /// Holds a button down until [`release`](Self::release) is called.
    pub fn press(&self, line: u32) {
        if let Some(state) = self.state.lock().lines.get_mut(&line) {
            state.level = Level::Low;
        }
    }

    pub fn release(&self, line: u32) {
        if let Some(state) = self.state.lock().lines.get_mut(&line) {
            state.level = Level::High;
        }
    }

    /// A single press: the next read of `line` returns low, later reads high.
    pub fn tap(&self, line: u32) {
        if let Some(state) = self.state.lock().lines.get_mut(&line) {
            state.taps += 1;
        }
    }

    /// Every later write to `line` fails.
    pub fn fail_writes_to(&self, line: u32) {
        self.state.lock().failing.insert(line);
    }

    pub fn level(&self, line: u32) -> Option<Level> {
        self.state.lock().lines.get(&line).map(|state| state.level)
    }

    pub fn mode(&self, line: u32) -> Option<PinMode> {
        self.state.lock().lines.get(&line).map(|state| state.mode)
    }

    pub fn writes(&self) -> Vec<GpioWrite> {
        self.state.lock().writes.clone()
    }

    pub fn writes_to(&self, line: u32) -> Vec<GpioWrite> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|write| write.line == line)
            .copied()
            .collect()
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.state.lock().cleaned_up
    }

    fn claim(&self, line: u32, mode: PinMode, level: Level) -> PlatformResult<()> {
        if line > MAX_LINE {
            return Err(PlatformError::new(format!(
                "line {line} is out of range (0..={MAX_LINE})"
            )));
        }
        let mut state = self.state.lock();
        if state.lines.contains_key(&line) {
            return Err(PlatformError::new(format!("line {line} is already claimed")));
        }
        state.cleaned_up = false;
        state.lines.insert(
            line,
            LineState {
                mode,
                level,
                taps: 0,
            },
        );
        Ok(())
    }
}

impl Default for SimulatedGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedGpio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedGpio")
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Gpio for SimulatedGpio {
    fn setup_output(&self, line: u32) -> PlatformResult<()> {
        self.claim(line, PinMode::Output, Level::Low)
    }

    fn setup_input_pull_up(&self, line: u32) -> PlatformResult<()> {
        self.claim(line, PinMode::InputPullUp, Level::High)
    }

    fn write(&self, line: u32, level: Level) -> PlatformResult<()> {
        let at = self.clock.now();
        let mut state = self.state.lock();
        if state.failing.contains(&line) {
            return Err(PlatformError::new(format!("write to line {line} failed")));
        }
        let line_state = state
            .lines
            .get_mut(&line)
            .ok_or_else(|| PlatformError::new(format!("line {line} is not set up")))?;
        if line_state.mode != PinMode::Output {
            return Err(PlatformError::new(format!("line {line} is not an output")));
        }
        line_state.level = level;
        state.writes.push(GpioWrite { at, line, level });
        Ok(())
    }

    fn read(&self, line: u32) -> PlatformResult<Level> {
        let mut state = self.state.lock();
        let line_state = state
            .lines
            .get_mut(&line)
            .ok_or_else(|| PlatformError::new(format!("line {line} is not set up")))?;
        if line_state.taps > 0 {
            line_state.taps -= 1;
            return Ok(Level::Low);
        }
        Ok(line_state.level)
    }

    fn cleanup(&self) {
        let mut state = self.state.lock();
        state.lines.clear();
        state.cleaned_up = true;
    }
}

/// One recorded mixer operation.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioCall {
    Init,
    SetVolume {
        channel: AudioChannelId,
        volume: f32,
    },
    Load(PathBuf),
    Play {
        channel: AudioChannelId,
        path: PathBuf,
        repeat: Repeat,
    },
    Stop(AudioChannelId),
    Quit,
}

#[derive(Debug, Default)]
struct AudioState {
    initialized: bool,
    samples: Vec<PathBuf>,
    playing: HashMap<AudioChannelId, PathBuf>,
    calls: Vec<AudioCall>,
    failing_play: bool,
}

/// Simulated mixer. It does not decode anything but checks that sound files
/// exist, remembers what each channel plays and logs it.
#[derive(Debug, Default)]
pub struct SimulatedAudio {
    state: Mutex<AudioState>,
}

impl SimulatedAudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later `play` call fails.
    pub fn fail_playback(&self) {
        self.state.lock().failing_play = true;
    }

    pub fn calls(&self) -> Vec<AudioCall> {
        self.state.lock().calls.clone()
    }

    /// Repeat values of every `play` of the file at `path`, in call order.
    pub fn plays_of(&self, path: &Path) -> Vec<Repeat> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                AudioCall::Play {
                    path: played,
                    repeat,
                    ..
                } if played == path => Some(*repeat),
                _ => None,
            })
            .collect()
    }

    /// File currently playing on `channel`.
    pub fn playing(&self, channel: AudioChannelId) -> Option<PathBuf> {
        self.state.lock().playing.get(&channel).cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    fn ensure_initialized(state: &AudioState) -> PlatformResult<()> {
        if state.initialized {
            Ok(())
        } else {
            Err(PlatformError::new("mixer not initialized"))
        }
    }
}

impl AudioBackend for SimulatedAudio {
    fn init(&self) -> PlatformResult<()> {
        let mut state = self.state.lock();
        state.initialized = true;
        state.calls.push(AudioCall::Init);
        Ok(())
    }

    fn set_volume(&self, channel: AudioChannelId, volume: f32) -> PlatformResult<()> {
        let mut state = self.state.lock();
        Self::ensure_initialized(&state)?;
        state.calls.push(AudioCall::SetVolume { channel, volume });
        Ok(())
    }

    fn load(&self, path: &Path) -> PlatformResult<SampleId> {
        let mut state = self.state.lock();
        Self::ensure_initialized(&state)?;
        if !path.is_file() {
            return Err(PlatformError::new(format!(
                "cannot open {}",
                path.display()
            )));
        }
        state.samples.push(path.to_path_buf());
        state.calls.push(AudioCall::Load(path.to_path_buf()));
        Ok(SampleId(state.samples.len() - 1))
    }

    fn play(
        &self,
        channel: AudioChannelId,
        sample: SampleId,
        repeat: Repeat,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock();
        Self::ensure_initialized(&state)?;
        if state.failing_play {
            return Err(PlatformError::new("device unavailable"));
        }
        let path = state
            .samples
            .get(sample.0)
            .cloned()
            .ok_or_else(|| PlatformError::new(format!("unknown sample {}", sample.0)))?;
        tracing::debug!(channel, path = %path.display(), ?repeat, "play");
        state.playing.insert(channel, path.clone());
        state.calls.push(AudioCall::Play {
            channel,
            path,
            repeat,
        });
        Ok(())
    }

    fn stop(&self, channel: AudioChannelId) -> PlatformResult<()> {
        let mut state = self.state.lock();
        Self::ensure_initialized(&state)?;
        state.playing.remove(&channel);
        state.calls.push(AudioCall::Stop(channel));
        Ok(())
    }

    fn quit(&self) {
        let mut state = self.state.lock();
        state.initialized = false;
        state.samples.clear();
        state.playing.clear();
        state.calls.push(AudioCall::Quit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;

    #[test]
    fn buttons_read_high_until_pressed() {
        let gpio = SimulatedGpio::new();
        gpio.setup_input_pull_up(17).unwrap();
        assert_eq!(gpio.read(17).unwrap(), Level::High);

        gpio.press(17);
        assert_eq!(gpio.read(17).unwrap(), Level::Low);
        gpio.release(17);
        assert_eq!(gpio.read(17).unwrap(), Level::High);
    }

    #[test]
    fn taps_are_seen_by_a_single_read() {
        let gpio = SimulatedGpio::new();
        gpio.setup_input_pull_up(23).unwrap();
        gpio.tap(23);
        assert_eq!(gpio.read(23).unwrap(), Level::Low);
        assert_eq!(gpio.read(23).unwrap(), Level::High);
    }

    #[test]
    fn rejects_double_claims_and_bad_lines() {
        let gpio = SimulatedGpio::new();
        gpio.setup_output(22).unwrap();
        assert!(gpio.setup_input_pull_up(22).is_err());
        assert!(gpio.setup_output(MAX_LINE + 1).is_err());
    }

    #[test]
    fn records_timestamped_writes() {
        let clock = Arc::new(ManualClock::new());
        let gpio = SimulatedGpio::with_clock(clock.clone());
        gpio.setup_output(10).unwrap();
        gpio.write(10, Level::High).unwrap();
        clock.advance(Duration::from_millis(400));
        gpio.write(10, Level::Low).unwrap();

        let writes = gpio.writes_to(10);
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].at, Duration::from_millis(400));
        assert_eq!(gpio.level(10), Some(Level::Low));
    }

    #[test]
    fn writes_to_inputs_fail() {
        let gpio = SimulatedGpio::new();
        gpio.setup_input_pull_up(5).unwrap();
        assert!(gpio.write(5, Level::High).is_err());
    }

    #[test]
    fn audio_requires_init_and_existing_files() {
        let audio = SimulatedAudio::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quote.wav");
        std::fs::write(&path, b"RIFF").unwrap();

        assert!(audio.load(&path).is_err());
        audio.init().unwrap();
        assert!(audio.load(&dir.path().join("missing.wav")).is_err());

        let sample = audio.load(&path).unwrap();
        audio.play(3, sample, Repeat::Once).unwrap();
        assert_eq!(audio.playing(3), Some(path.clone()));
        assert_eq!(audio.plays_of(&path), vec![Repeat::Once]);

        audio.stop(3).unwrap();
        assert_eq!(audio.playing(3), None);
    }
}
