//! The foreground state machine: poll the three buttons, dispatch sounds and
//! the lightsaber LED, and watch over the slot LED sequencer.

use std::{collections::HashSet, time::Duration};

use crate::{
    channels::{ChannelRegistry, ChannelRole},
    platform::{Gpio, Level, Repeat},
    sounds::{SoundBank, SoundHandle},
    Clock, Result, StopToken, SupervisedTask,
};

/// Pause between two polls when nothing is pressed.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Pause after a dispatched press so one press is dispatched once.
pub const SETTLE_DELAY: Duration = Duration::from_millis(200);
/// Lets the lightsaber sound start before the blade lights up or goes dark.
pub const LIGHTSABER_LED_DELAY: Duration = Duration::from_millis(100);

/// State of the lightsaber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaberState {
    /// Retracted.
    #[default]
    Idle,
    /// Extended and humming.
    Drawn,
}

/// What a poll dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    DrawSaber,
    RetractSaber,
    PlaySong,
    /// Quote at the given position of the quote bank.
    PlayQuote(usize),
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// External interrupt: a controlled shutdown.
    Interrupted,
    /// The sequencer task is no longer alive.
    SequencerDied,
}

/// Outcome of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Idle,
    Dispatched(Action),
    Exit(LoopExit),
}

#[derive(Debug, Clone, Copy)]
struct Lines {
    lightsaber_button: u32,
    song_button: u32,
    quotes_button: u32,
    lightsaber_led: u32,
}

pub struct ActivationLoop<'a> {
    gpio: &'a dyn Gpio,
    clock: &'a dyn Clock,
    sounds: &'a SoundBank,
    lines: Lines,
    drawing: &'a SoundHandle,
    hum: &'a SoundHandle,
    retraction: &'a SoundHandle,
    song: &'a SoundHandle,
    state: SaberState,
    next_quote: usize,
    unreadable: HashSet<u32>,
}

impl<'a> ActivationLoop<'a> {
    /// Looks up every channel and sound the loop needs. Fails on the first
    /// one missing, before any button is polled.
    pub fn new(
        channels: &ChannelRegistry,
        sounds: &'a SoundBank,
        gpio: &'a dyn Gpio,
        clock: &'a dyn Clock,
    ) -> Result<Self> {
        let lines = Lines {
            lightsaber_button: channels.line("lightsaber_button", ChannelRole::Button)?,
            song_button: channels.line("song_button", ChannelRole::Button)?,
            quotes_button: channels.line("quotes_button", ChannelRole::Button)?,
            lightsaber_led: channels.line("lightsaber_led", ChannelRole::Led)?,
        };
        Ok(Self {
            gpio,
            clock,
            sounds,
            lines,
            drawing: sounds.get("lightsaber_drawing_sound")?,
            hum: sounds.get("lightsaber_hum_sound")?,
            retraction: sounds.get("lightsaber_retraction_sound")?,
            song: sounds.get("imperial_march_song")?,
            state: SaberState::Idle,
            next_quote: 0,
            unreadable: HashSet::new(),
        })
    }

    pub fn state(&self) -> SaberState {
        self.state
    }

    /// Runs one iteration. At most one action is dispatched, checked in
    /// priority order: lightsaber, song, quotes, then the sequencer's health.
    pub fn poll(&mut self, sequencer: &SupervisedTask, interrupt: &StopToken) -> Tick {
        if interrupt.is_requested() {
            return Tick::Exit(LoopExit::Interrupted);
        }

        let action = if self.pressed(self.lines.lightsaber_button) {
            self.toggle_saber()
        } else if self.pressed(self.lines.song_button) {
            play(self.song, self.song.default_repeat());
            Action::PlaySong
        } else if self.pressed(self.lines.quotes_button) {
            let index = self.next_quote;
            self.next_quote = (index + 1) % self.sounds.quote_count();
            let quote = self.sounds.quote(index);
            tracing::debug!(quote = %quote.name(), "quotes button pressed");
            play(quote, quote.default_repeat());
            Action::PlayQuote(index)
        } else if !sequencer.is_alive() {
            tracing::debug!(task = %sequencer.name(), "slot LED sequencer is no longer running");
            return Tick::Exit(LoopExit::SequencerDied);
        } else {
            self.clock.sleep(POLL_INTERVAL);
            return Tick::Idle;
        };

        self.clock.sleep(SETTLE_DELAY);
        Tick::Dispatched(action)
    }

    /// Polls until an interrupt or the sequencer's death.
    pub fn run(&mut self, sequencer: &SupervisedTask, interrupt: &StopToken) -> LoopExit {
        tracing::info!("Press buttons");
        loop {
            if let Tick::Exit(exit) = self.poll(sequencer, interrupt) {
                return exit;
            }
        }
    }

    fn toggle_saber(&mut self) -> Action {
        match self.state {
            SaberState::Idle => {
                play(self.drawing, Repeat::Once);
                play(self.hum, Repeat::Forever);
                self.clock.sleep(LIGHTSABER_LED_DELAY);
                self.set_saber_led(Level::High);
                self.state = SaberState::Drawn;
                Action::DrawSaber
            }
            SaberState::Drawn => {
                if let Err(err) = self.hum.stop() {
                    tracing::warn!("{err}");
                }
                play(self.retraction, Repeat::Once);
                self.clock.sleep(LIGHTSABER_LED_DELAY);
                self.set_saber_led(Level::Low);
                self.state = SaberState::Idle;
                Action::RetractSaber
            }
        }
    }

    fn set_saber_led(&self, level: Level) {
        if let Err(err) = self.gpio.write(self.lines.lightsaber_led, level) {
            tracing::warn!(line = self.lines.lightsaber_led, "lightsaber LED: {err}");
        }
    }

    /// Buttons are pulled up: pressed reads low. A line that cannot be read
    /// counts as released and is reported once.
    fn pressed(&mut self, line: u32) -> bool {
        match self.gpio.read(line) {
            Ok(level) => level == Level::Low,
            Err(err) => {
                if self.unreadable.insert(line) {
                    tracing::warn!(line, "cannot read button: {err}");
                }
                false
            }
        }
    }
}

impl std::fmt::Debug for ActivationLoop<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationLoop")
            .field("lines", &self.lines)
            .field("state", &self.state)
            .field("next_quote", &self.next_quote)
            .finish()
    }
}

/// Playback faults never stop the loop.
fn play(sound: &SoundHandle, repeat: Repeat) {
    if let Err(err) = sound.play(repeat) {
        tracing::warn!("{err}");
    }
}

#[cfg(test)]
mod tests {
    use std::{rc::Rc, sync::Arc};

    use super::*;
    use crate::{
        config::MainConfig,
        platform::{
            sim::{SimulatedAudio, SimulatedGpio},
            AudioBackend,
        },
        ManualClock,
    };

    struct Rig {
        _dir: tempfile::TempDir,
        config: MainConfig,
        gpio: Arc<SimulatedGpio>,
        audio: Rc<SimulatedAudio>,
        clock: Arc<ManualClock>,
        channels: ChannelRegistry,
        sounds: SoundBank,
        sequencer: SupervisedTask,
        interrupt: StopToken,
    }

    impl Rig {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = MainConfig::factory_default().unwrap();
            config.sounds_directory = dir.path().to_path_buf();
            for (sound, _) in config.sound_entries() {
                std::fs::write(config.sound_path(sound), b"RIFF").unwrap();
            }

            let clock = Arc::new(ManualClock::new());
            let gpio = Arc::new(SimulatedGpio::with_clock(clock.clone()));
            let audio = Rc::new(SimulatedAudio::new());
            audio.init().unwrap();
            let channels = ChannelRegistry::build(&config.gpio_channels, &*gpio).unwrap();
            let sounds = SoundBank::load(&config, audio.clone()).unwrap();
            let sequencer = SupervisedTask::spawn("slot_leds", |stop| {
                while !stop.is_requested() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            })
            .unwrap();

            Self {
                _dir: dir,
                config,
                gpio,
                audio,
                clock,
                channels,
                sounds,
                sequencer,
                interrupt: StopToken::new(),
            }
        }

        fn line(&self, id: &str) -> u32 {
            self.channels.get(id).unwrap().line
        }

        fn sound_path(&self, id: &str) -> std::path::PathBuf {
            self.sounds.get(id).unwrap().path().to_path_buf()
        }

        fn activation(&self) -> ActivationLoop<'_> {
            ActivationLoop::new(
                &self.channels,
                &self.sounds,
                &*self.gpio,
                &*self.clock,
            )
            .unwrap()
        }
    }

    /// Virtual time that lets go of a held button once `release_at` is reached.
    struct HoldingClock {
        inner: Arc<ManualClock>,
        gpio: Arc<SimulatedGpio>,
        line: u32,
        release_at: Duration,
    }

    impl Clock for HoldingClock {
        fn now(&self) -> Duration {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.advance(duration);
            if self.inner.now() >= self.release_at {
                self.gpio.release(self.line);
            }
        }
    }

    /// Holds the song button for `hold` and counts the dispatches over 50 polls.
    fn song_dispatches_while_held(hold: Duration) -> usize {
        let rig = Rig::new();
        let button = rig.line("song_button");
        let clock = HoldingClock {
            inner: rig.clock.clone(),
            gpio: rig.gpio.clone(),
            line: button,
            release_at: rig.clock.now() + hold,
        };
        let mut activation =
            ActivationLoop::new(&rig.channels, &rig.sounds, &*rig.gpio, &clock).unwrap();

        rig.gpio.press(button);
        let dispatched = (0..50)
            .filter(|_| {
                activation.poll(&rig.sequencer, &rig.interrupt)
                    == Tick::Dispatched(Action::PlaySong)
            })
            .count();
        assert_eq!(
            rig.audio.plays_of(&rig.sound_path("imperial_march_song")).len(),
            dispatched
        );
        dispatched
    }

    #[test]
    fn press_shorter_than_the_settle_delay_fires_once() {
        assert_eq!(song_dispatches_while_held(SETTLE_DELAY / 2), 1);
        assert_eq!(song_dispatches_while_held(SETTLE_DELAY - POLL_INTERVAL), 1);
    }

    #[test]
    fn held_button_fires_again_after_each_settle_delay() {
        assert_eq!(song_dispatches_while_held(SETTLE_DELAY * 5 / 2), 3);
    }

    #[test]
    fn idle_poll_waits_one_interval() {
        let rig = Rig::new();
        let mut activation = rig.activation();
        let before = rig.clock.now();
        assert_eq!(activation.poll(&rig.sequencer, &rig.interrupt), Tick::Idle);
        assert_eq!(rig.clock.now() - before, POLL_INTERVAL);
    }

    #[test]
    fn lightsaber_toggles_between_two_states() {
        let rig = Rig::new();
        let mut activation = rig.activation();
        let button = rig.line("lightsaber_button");
        let led = rig.line("lightsaber_led");
        let drawing = rig.sound_path("lightsaber_drawing_sound");
        let hum = rig.sound_path("lightsaber_hum_sound");
        let retraction = rig.sound_path("lightsaber_retraction_sound");

        rig.gpio.tap(button);
        assert_eq!(
            activation.poll(&rig.sequencer, &rig.interrupt),
            Tick::Dispatched(Action::DrawSaber)
        );
        assert_eq!(activation.state(), SaberState::Drawn);
        assert_eq!(rig.audio.plays_of(&drawing), vec![Repeat::Once]);
        assert_eq!(rig.audio.plays_of(&hum), vec![Repeat::Forever]);
        assert_eq!(rig.gpio.level(led), Some(Level::High));

        rig.gpio.tap(button);
        assert_eq!(
            activation.poll(&rig.sequencer, &rig.interrupt),
            Tick::Dispatched(Action::RetractSaber)
        );
        assert_eq!(activation.state(), SaberState::Idle);
        assert_eq!(rig.audio.plays_of(&retraction), vec![Repeat::Once]);
        assert_eq!(rig.audio.plays_of(&drawing).len(), 1);
        assert_eq!(rig.audio.plays_of(&hum).len(), 1);
        assert_eq!(rig.gpio.level(led), Some(Level::Low));

        rig.gpio.tap(button);
        activation.poll(&rig.sequencer, &rig.interrupt);
        assert_eq!(activation.state(), SaberState::Drawn);
    }

    #[test]
    fn dispatch_is_followed_by_the_settle_delay() {
        let rig = Rig::new();
        let mut activation = rig.activation();
        rig.gpio.tap(rig.line("song_button"));

        let before = rig.clock.now();
        assert_eq!(
            activation.poll(&rig.sequencer, &rig.interrupt),
            Tick::Dispatched(Action::PlaySong)
        );
        assert_eq!(rig.clock.now() - before, SETTLE_DELAY);
        assert_eq!(activation.state(), SaberState::Idle);
        let song = rig.sound_path("imperial_march_song");
        assert_eq!(rig.audio.plays_of(&song), vec![Repeat::Once]);
    }

    #[test]
    fn quotes_cycle_in_order() {
        let rig = Rig::new();
        let mut activation = rig.activation();
        let button = rig.line("quotes_button");
        let k = rig.sounds.quote_count();

        for j in 0..(2 * k + 1) {
            rig.gpio.tap(button);
            assert_eq!(
                activation.poll(&rig.sequencer, &rig.interrupt),
                Tick::Dispatched(Action::PlayQuote(j % k))
            );
        }
        let first = rig.sounds.quote(0).path().to_path_buf();
        assert_eq!(rig.audio.plays_of(&first).len(), 3);
    }

    #[test]
    fn only_the_highest_priority_press_fires() {
        let rig = Rig::new();
        let mut activation = rig.activation();
        rig.gpio.tap(rig.line("quotes_button"));
        rig.gpio.tap(rig.line("song_button"));
        rig.gpio.tap(rig.line("lightsaber_button"));

        assert_eq!(
            activation.poll(&rig.sequencer, &rig.interrupt),
            Tick::Dispatched(Action::DrawSaber)
        );
        assert_eq!(
            activation.poll(&rig.sequencer, &rig.interrupt),
            Tick::Dispatched(Action::PlaySong)
        );
        assert_eq!(
            activation.poll(&rig.sequencer, &rig.interrupt),
            Tick::Dispatched(Action::PlayQuote(0))
        );
    }

    #[test]
    fn playback_faults_do_not_stop_the_loop() {
        let rig = Rig::new();
        let mut activation = rig.activation();
        rig.audio.fail_playback();
        rig.gpio.tap(rig.line("lightsaber_button"));

        assert_eq!(
            activation.poll(&rig.sequencer, &rig.interrupt),
            Tick::Dispatched(Action::DrawSaber)
        );
        assert_eq!(rig.gpio.level(rig.line("lightsaber_led")), Some(Level::High));
        assert_eq!(activation.poll(&rig.sequencer, &rig.interrupt), Tick::Idle);
    }

    #[test]
    fn interrupt_ends_the_loop() {
        let rig = Rig::new();
        let mut activation = rig.activation();
        rig.interrupt.request();
        assert_eq!(
            activation.run(&rig.sequencer, &rig.interrupt),
            LoopExit::Interrupted
        );
    }

    #[test]
    fn dead_sequencer_ends_the_loop() {
        let mut rig = Rig::new();
        rig.sequencer.request_stop();
        rig.sequencer.join(Duration::from_secs(5));

        let mut activation = rig.activation();
        assert_eq!(
            activation.run(&rig.sequencer, &rig.interrupt),
            LoopExit::SequencerDied
        );
    }

    #[test]
    fn missing_bindings_are_rejected_up_front() {
        let rig = Rig::new();
        let mut config = rig.config.clone();
        config.gpio_channels.retain(|c| c.channel_id != "quotes_button");
        let gpio = SimulatedGpio::new();
        let channels = ChannelRegistry::build(&config.gpio_channels, &gpio).unwrap();

        let err = ActivationLoop::new(&channels, &rig.sounds, &gpio, &*rig.clock).unwrap_err();
        assert!(err.to_string().contains("quotes_button"));
    }
}
