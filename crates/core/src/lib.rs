//! Core library for the Darth Vader costume prop.
//!
//! The crate drives three slot LEDs through a repeating pattern on a
//! background task, watches three push buttons and plays sound cues in
//! response. Each module owns one subsystem; hardware sits behind the traits
//! in [`platform`] so that everything above it runs unchanged against the
//! simulated devices in [`platform::sim`].

pub mod activation;
pub mod channels;
pub mod config;
pub mod error;
pub mod platform;
pub mod sequencer;
pub mod session;
pub mod sounds;
pub mod task;
pub mod timeline;

pub use activation::{Action, ActivationLoop, LoopExit, SaberState};
pub use channels::{ChannelDescriptor, ChannelRegistry, ChannelRole};
pub use config::{MainConfig, DEFAULT_CONFIG_JSON};
pub use error::{Result, VaderError};
pub use platform::{AudioBackend, Gpio, Level, Platform, PlatformError, Repeat};
pub use sequencer::{LedSequencer, NamedSequence, Sequence, SequenceStep, SlotLabel};
pub use session::{run_activation_session, ExitStatus, Session};
pub use sounds::{SoundBank, SoundHandle};
pub use task::{JoinOutcome, StopToken, SupervisedTask};
pub use timeline::{Clock, ManualClock, SystemClock};
