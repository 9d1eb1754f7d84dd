//! Start-up and teardown of an activation session.
//!
//! Start-up: audio init, GPIO lines, channel volumes and sounds, sequencer
//! task, activation loop. Teardown always runs, whatever ended the session:
//! stop and join the sequencer, turn every LED off, stop every audio channel,
//! close the mixer, release the lines.

use std::time::Duration;

use crate::{
    activation::{ActivationLoop, LoopExit},
    channels::{ChannelRegistry, ChannelRole},
    config::MainConfig,
    platform::{AudioChannelId, Level, Platform, Repeat},
    sequencer::{LedSequencer, Sequence, SequencerTiming, SlotLabel, SlotLines},
    sounds::SoundBank,
    Result, StopToken, SupervisedTask, VaderError,
};

/// Name of the background task driving the slot LEDs.
pub const SEQUENCER_TASK: &str = "thread_slot_leds";
/// Sound played when the session is interrupted.
pub const CLOSING_SOUND: &str = "closing_sound";
/// How long the closing sound plays before teardown goes on.
pub const CLOSING_GRACE: Duration = Duration::from_secs(1);
/// The sequencer gets this many step periods to stop before it is detached.
pub const JOIN_STEP_MULTIPLE: u32 = 10;
const MIN_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Process exit status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Ended by an external interrupt.
    Success,
    /// Ended by a fault, including the sequencer's death.
    Failure,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
        }
    }
}

/// Runs one activation session until it is interrupted or faults.
///
/// `interrupt` is the external shutdown request, e.g. set by a signal
/// handler. Every fault is reported once through `tracing`; teardown runs in
/// every case.
pub fn run_activation_session(
    config: &MainConfig,
    platform: Platform,
    interrupt: &StopToken,
) -> ExitStatus {
    let mut session = Session::new(platform);
    let status = match session.start(config).and_then(|()| session.run(interrupt)) {
        Ok(LoopExit::Interrupted) => {
            tracing::info!("Exiting...");
            session.play_closing_sound();
            ExitStatus::Success
        }
        Ok(LoopExit::SequencerDied) => {
            // A captured fault was already reported by the task itself.
            if session.sequencer_fault().is_none() {
                let err = VaderError::SequencerFault("exited without an error".into());
                tracing::error!("{}: {err}", err.kind());
            }
            ExitStatus::Failure
        }
        Err(err) => {
            tracing::error!("{}: {err}", err.kind());
            ExitStatus::Failure
        }
    };
    session.teardown();
    status
}

/// Resources of a session, acquired in order and released in reverse.
pub struct Session {
    platform: Platform,
    audio_channels: Vec<AudioChannelId>,
    audio_ready: bool,
    channels: Option<ChannelRegistry>,
    sounds: Option<SoundBank>,
    sequencer: Option<SupervisedTask>,
    join_timeout: Duration,
}

impl Session {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            audio_channels: Vec::new(),
            audio_ready: false,
            channels: None,
            sounds: None,
            sequencer: None,
            join_timeout: MIN_JOIN_TIMEOUT,
        }
    }

    /// Acquires everything up to a running sequencer. On error, whatever was
    /// acquired stays owned by the session for [`teardown`](Self::teardown).
    pub fn start(&mut self, config: &MainConfig) -> Result<()> {
        config.validate()?;

        tracing::info!("audio mixer initialization");
        self.platform
            .audio
            .init()
            .map_err(|e| VaderError::AudioInit(e.0))?;
        self.audio_ready = true;
        self.audio_channels = config.audio_channels.iter().map(|c| c.channel_id).collect();

        tracing::info!("GPIO initialization");
        let channels = self
            .channels
            .insert(ChannelRegistry::build(&config.gpio_channels, &*self.platform.gpio)?);
        let lines = SlotLines {
            top: channels.line(SlotLabel::Top.channel_id(), ChannelRole::Led)?,
            middle: channels.line(SlotLabel::Middle.channel_id(), ChannelRole::Led)?,
            bottom: channels.line(SlotLabel::Bottom.channel_id(), ChannelRole::Led)?,
        };

        self.sounds = Some(SoundBank::load(config, self.platform.audio.clone())?);

        let slot_leds = &config.slot_leds;
        let sequence = Sequence::resolve(&slot_leds.sequence)?;
        let timing =
            SequencerTiming::from_seconds(slot_leds.time_per_step, slot_leds.delay_between_steps);
        self.join_timeout = timing
            .step_period()
            .saturating_mul(JOIN_STEP_MULTIPLE)
            .max(MIN_JOIN_TIMEOUT);

        let sequencer = LedSequencer::new(
            sequence,
            lines,
            timing,
            self.platform.gpio.clone(),
            self.platform.clock.clone(),
        );
        self.sequencer = Some(SupervisedTask::spawn(SEQUENCER_TASK, move |stop| {
            sequencer.run(&stop)
        })?);
        Ok(())
    }

    /// Runs the activation loop on the current thread.
    pub fn run(&self, interrupt: &StopToken) -> Result<LoopExit> {
        let (Some(channels), Some(sounds), Some(sequencer)) =
            (&self.channels, &self.sounds, &self.sequencer)
        else {
            return Err(VaderError::config("session was not started"));
        };
        let mut activation = ActivationLoop::new(
            channels,
            sounds,
            &*self.platform.gpio,
            &*self.platform.clock,
        )?;
        Ok(activation.run(sequencer, interrupt))
    }

    /// Fault captured by the sequencer task, once it has ended.
    pub fn sequencer_fault(&self) -> Option<String> {
        self.sequencer
            .as_ref()
            .and_then(|task| task.last_error())
            .map(str::to_string)
    }

    /// Plays the closing sound, if configured and not muted, and waits for it.
    pub fn play_closing_sound(&self) {
        let Some(closing) = self.sounds.as_ref().and_then(|s| s.find(CLOSING_SOUND)) else {
            return;
        };
        if closing.is_muted() {
            return;
        }
        match closing.play(Repeat::Once) {
            Ok(()) => self.platform.clock.sleep(CLOSING_GRACE),
            Err(err) => tracing::warn!("{err}"),
        }
    }

    /// Releases everything [`start`](Self::start) acquired. Safe to call on a
    /// session that failed halfway or never started.
    pub fn teardown(&mut self) {
        if let Some(mut sequencer) = self.sequencer.take() {
            sequencer.request_stop();
            sequencer.join(self.join_timeout);
            tracing::debug!("Thread stopped: {}", sequencer.name());
        }

        if let Some(channels) = &self.channels {
            for led in channels.leds() {
                if let Err(err) = self.platform.gpio.write(led.line, Level::Low) {
                    tracing::warn!(channel = %led.id, "cannot turn LED off: {err}");
                }
            }
        }

        if self.audio_ready {
            for &channel in &self.audio_channels {
                if let Err(err) = self.platform.audio.stop(channel) {
                    tracing::warn!(channel, "cannot stop audio channel: {err}");
                }
            }
            self.sounds = None;
            self.platform.audio.quit();
            self.audio_ready = false;
        }

        tracing::info!("Cleanup...");
        self.channels = None;
        self.platform.gpio.cleanup();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("channels", &self.channels)
            .field("sounds", &self.sounds)
            .field("sequencer", &self.sequencer)
            .field("join_timeout", &self.join_timeout)
            .finish()
    }
}
