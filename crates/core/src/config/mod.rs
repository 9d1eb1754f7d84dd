//! The JSON main configuration and its validation.
//!
//! A file that parses is not yet usable: [`MainConfig::validate`] checks
//! the cross-references between channels, sounds and sequences, and the
//! slot LED timing, before anything is claimed.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    channels::ChannelRole,
    platform::{AudioChannelId, Repeat},
    sequencer::{Sequence, SequenceSpec},
    Result, VaderError,
};

/// Factory default configuration shipped with the crate.
pub const DEFAULT_CONFIG_JSON: &str = include_str!("default_config.json");

/// GPIO channels the activation session cannot run without.
pub const REQUIRED_CHANNELS: [&str; 7] = [
    "top_led",
    "middle_led",
    "bottom_led",
    "lightsaber_led",
    "lightsaber_button",
    "song_button",
    "quotes_button",
];

/// Sounds the activation session cannot run without.
pub const REQUIRED_SOUNDS: [&str; 4] = [
    "lightsaber_drawing_sound",
    "lightsaber_hum_sound",
    "lightsaber_retraction_sound",
    "imperial_march_song",
];

/// Upper bound for `time_per_step` and `delay_between_steps`, in seconds.
pub const MAX_STEP_SECONDS: f64 = 3600.0;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainConfig {
    /// Directory the sound filenames are relative to.
    #[serde(default)]
    pub sounds_directory: PathBuf,
    pub gpio_channels: Vec<GpioChannelEntry>,
    pub audio_channels: Vec<AudioChannelSpec>,
    #[serde(default)]
    pub quotes: Vec<SoundEntry>,
    #[serde(default)]
    pub songs: Vec<SoundEntry>,
    #[serde(default)]
    pub sound_effects: Vec<SoundEntry>,
    #[serde(default)]
    pub slot_leds: SlotLedsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioChannelEntry {
    pub channel_id: String,
    /// Inferred from `channel_id` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChannelRole>,
    pub channel_number: u32,
    pub channel_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_symbol: Option<String>,
}

impl GpioChannelEntry {
    pub fn role(&self) -> ChannelRole {
        self.role
            .unwrap_or_else(|| ChannelRole::infer(&self.channel_id))
    }
}

/// Output channel of the mixer and its volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioChannelSpec {
    pub channel_id: AudioChannelId,
    pub volume: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundEntry {
    pub id: String,
    pub name: String,
    pub filename: PathBuf,
    pub audio_channel_id: AudioChannelId,
    #[serde(default)]
    pub mute: bool,
    /// `-1` loops forever, `n >= 0` repeats `n` extra times.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loops: Option<i32>,
}

impl SoundEntry {
    pub fn repeat(&self) -> Result<Option<Repeat>> {
        self.loops
            .map(|loops| {
                Repeat::from_loop_count(loops).ok_or_else(|| {
                    VaderError::config(format!(
                        "sound `{}` has an invalid loop count {loops} (use -1 or more)",
                        self.id
                    ))
                })
            })
            .transpose()
    }
}

/// Settings of the slot LED sequencer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotLedsConfig {
    pub sequence: SequenceSpec,
    /// Seconds every slot stays off after a non-empty step.
    pub delay_between_steps: f64,
    /// Seconds a step lasts.
    pub time_per_step: f64,
}

impl Default for SlotLedsConfig {
    fn default() -> Self {
        Self {
            sequence: SequenceSpec::default(),
            delay_between_steps: 0.4,
            time_per_step: 0.4,
        }
    }
}

impl MainConfig {
    pub fn factory_default() -> Result<Self> {
        Self::from_json(DEFAULT_CONFIG_JSON)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Every sound entry, with `true` for quotes.
    pub fn sound_entries(&self) -> impl Iterator<Item = (&SoundEntry, bool)> {
        self.quotes
            .iter()
            .map(|sound| (sound, true))
            .chain(self.songs.iter().map(|sound| (sound, false)))
            .chain(self.sound_effects.iter().map(|sound| (sound, false)))
    }

    pub fn sound_path(&self, sound: &SoundEntry) -> PathBuf {
        self.sounds_directory.join(&sound.filename)
    }

    /// Structural validation of everything the activation session relies on.
    pub fn validate(&self) -> Result<()> {
        self.validate_channels()?;
        self.validate_sounds()?;
        self.validate_slot_leds()
    }

    /// Fails with [`VaderError::MissingAsset`] on the first declared sound
    /// file that does not exist.
    pub fn check_sound_files(&self) -> Result<()> {
        for (sound, _) in self.sound_entries() {
            let path = self.sound_path(sound);
            if !path.is_file() {
                return Err(VaderError::MissingAsset { path });
            }
        }
        Ok(())
    }

    fn validate_channels(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut lines = HashSet::new();
        for channel in &self.gpio_channels {
            if !ids.insert(channel.channel_id.as_str()) {
                return Err(VaderError::config(format!(
                    "duplicate GPIO channel `{}`",
                    channel.channel_id
                )));
            }
            if !lines.insert(channel.channel_number) {
                return Err(VaderError::config(format!(
                    "GPIO line {} is used by more than one channel",
                    channel.channel_number
                )));
            }
        }

        for required in REQUIRED_CHANNELS {
            let channel = self
                .gpio_channels
                .iter()
                .find(|channel| channel.channel_id == required)
                .ok_or_else(|| VaderError::UnknownChannel(required.to_string()))?;
            if channel.role() != ChannelRole::infer(required) {
                return Err(VaderError::config(format!(
                    "GPIO channel `{required}` must be a {:?}",
                    ChannelRole::infer(required)
                )));
            }
        }
        Ok(())
    }

    fn validate_sounds(&self) -> Result<()> {
        let mut audio_channels = HashSet::new();
        for channel in &self.audio_channels {
            if !audio_channels.insert(channel.channel_id) {
                return Err(VaderError::config(format!(
                    "duplicate audio channel {}",
                    channel.channel_id
                )));
            }
            if !(0.0..=1.0).contains(&channel.volume) {
                return Err(VaderError::config(format!(
                    "audio channel {} has volume {} outside 0.0..=1.0",
                    channel.channel_id, channel.volume
                )));
            }
        }

        let mut ids = HashSet::new();
        for (sound, _) in self.sound_entries() {
            if !ids.insert(sound.id.as_str()) {
                return Err(VaderError::config(format!("duplicate sound `{}`", sound.id)));
            }
            if !audio_channels.contains(&sound.audio_channel_id) {
                return Err(VaderError::config(format!(
                    "sound `{}` uses undeclared audio channel {}",
                    sound.id, sound.audio_channel_id
                )));
            }
            sound.repeat()?;
        }

        for required in REQUIRED_SOUNDS {
            if !ids.contains(required) {
                return Err(VaderError::UnknownSound(required.to_string()));
            }
        }
        if self.quotes.is_empty() {
            return Err(VaderError::config("at least one quote is required"));
        }
        Ok(())
    }

    fn validate_slot_leds(&self) -> Result<()> {
        let slot_leds = &self.slot_leds;
        for (name, value) in [
            ("time_per_step", slot_leds.time_per_step),
            ("delay_between_steps", slot_leds.delay_between_steps),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(VaderError::config(format!(
                    "slot_leds.{name} must be a non-negative number of seconds, got {value}"
                )));
            }
            if value > MAX_STEP_SECONDS {
                return Err(VaderError::config(format!(
                    "slot_leds.{name} must be at most {MAX_STEP_SECONDS} seconds, got {value}"
                )));
            }
        }
        Sequence::resolve(&slot_leds.sequence).map(|_| ())
    }
}
