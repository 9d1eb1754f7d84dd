//! The I/O boundary: digital lines and the audio mixer.
//!
//! The engine only ever talks to hardware through the [`Gpio`] and
//! [`AudioBackend`] capabilities. A session receives them explicitly (see
//! [`Platform`]); nothing in the crate reaches for a process-wide handle.
//! Simulated backends live in [`sim`], the real audio device behind the
//! `playback` feature in [`rodio_audio`].

use std::{path::Path, rc::Rc, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::Clock;

#[cfg(feature = "playback")]
pub mod rodio_audio;
pub mod sim;

/// Identifier of a physical audio output channel.
pub type AudioChannelId = u16;

/// Error reported by a backend. Callers attach the identifiers they know about.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PlatformError(pub String);

impl PlatformError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Logic level of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

/// Digital line access.
///
/// Button lines are configured with a pull-up, so a depressed button reads
/// [`Level::Low`].
pub trait Gpio: Send + Sync {
    fn setup_output(&self, line: u32) -> PlatformResult<()>;
    fn setup_input_pull_up(&self, line: u32) -> PlatformResult<()>;
    fn write(&self, line: u32, level: Level) -> PlatformResult<()>;
    /// Non-blocking read of the current level.
    fn read(&self, line: u32) -> PlatformResult<Level>;
    /// Releases every claimed line.
    fn cleanup(&self);
}

/// Handle to a decoded sound held by an [`AudioBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleId(pub usize);

/// How many times a sound plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repeat {
    /// Play a single time.
    Once,
    /// Play once, then repeat `n` more times.
    Extra(u32),
    /// Loop until the channel is stopped.
    Forever,
}

impl Repeat {
    /// Converts the classic loop count: `0` plays once, `-1` loops forever and
    /// `n > 0` repeats `n` extra times. Anything below `-1` is rejected.
    pub fn from_loop_count(loops: i32) -> Option<Self> {
        match loops {
            -1 => Some(Self::Forever),
            0 => Some(Self::Once),
            n if n > 0 => Some(Self::Extra(n.unsigned_abs())),
            _ => None,
        }
    }
}

/// Mixer with a fixed set of output channels.
///
/// Each channel plays at most one sound at a time; `play` replaces whatever
/// the channel was playing. Audio is driven from the foreground activity only,
/// hence no `Send` bound.
pub trait AudioBackend {
    fn init(&self) -> PlatformResult<()>;
    fn set_volume(&self, channel: AudioChannelId, volume: f32) -> PlatformResult<()>;
    fn load(&self, path: &Path) -> PlatformResult<SampleId>;
    fn play(&self, channel: AudioChannelId, sample: SampleId, repeat: Repeat)
        -> PlatformResult<()>;
    fn stop(&self, channel: AudioChannelId) -> PlatformResult<()>;
    /// Stops everything and releases the device and the loaded samples.
    fn quit(&self);
}

/// Capabilities handed to an activation session.
#[derive(Clone)]
pub struct Platform {
    pub gpio: Arc<dyn Gpio>,
    pub audio: Rc<dyn AudioBackend>,
    pub clock: Arc<dyn Clock>,
}

impl Platform {
    pub fn new(gpio: Arc<dyn Gpio>, audio: Rc<dyn AudioBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { gpio, audio, clock }
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_loop_counts() {
        assert_eq!(Repeat::from_loop_count(-1), Some(Repeat::Forever));
        assert_eq!(Repeat::from_loop_count(0), Some(Repeat::Once));
        assert_eq!(Repeat::from_loop_count(2), Some(Repeat::Extra(2)));
        assert_eq!(Repeat::from_loop_count(-2), None);
    }
}
