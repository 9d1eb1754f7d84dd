//! Loading the configured sounds onto the mixer.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    rc::Rc,
};

use crate::{
    config::{MainConfig, SoundEntry},
    platform::{AudioBackend, AudioChannelId, Repeat, SampleId},
    Result, VaderError,
};

/// Sound started looping forever as soon as it is loaded, whatever its
/// configured `loops`.
pub const AMBIENT_SOUND: &str = "breathing_sound";

/// A loaded sound bound to one audio channel.
pub struct SoundHandle {
    id: String,
    name: String,
    path: PathBuf,
    channel: AudioChannelId,
    mute: bool,
    default_repeat: Repeat,
    sample: SampleId,
    audio: Rc<dyn AudioBackend>,
}

impl SoundHandle {
    /// Plays the sound on its channel, replacing whatever the channel was
    /// playing. A muted sound silently does nothing.
    pub fn play(&self, repeat: Repeat) -> Result<()> {
        if self.mute {
            tracing::debug!(sound = %self.id, "muted, not playing");
            return Ok(());
        }
        self.audio
            .play(self.channel, self.sample, repeat)
            .map_err(|e| VaderError::playback(self.channel, format!("`{}`: {e}", self.id)))
    }

    /// Stops the sound's channel.
    pub fn stop(&self) -> Result<()> {
        self.audio
            .stop(self.channel)
            .map_err(|e| VaderError::playback(self.channel, format!("`{}`: {e}", self.id)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_muted(&self) -> bool {
        self.mute
    }

    /// Repeat count configured for the sound, used when a button plays it.
    pub fn default_repeat(&self) -> Repeat {
        self.default_repeat
    }
}

impl std::fmt::Debug for SoundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("channel", &self.channel)
            .field("mute", &self.mute)
            .finish()
    }
}

/// Every loaded sound: quotes by position, everything else by identifier.
#[derive(Debug)]
pub struct SoundBank {
    quotes: Vec<SoundHandle>,
    singles: HashMap<String, SoundHandle>,
}

impl SoundBank {
    /// Sets the channel volumes, then loads every sound of `config` into an
    /// initialized mixer.
    ///
    /// The ambient sound starts looping right away unless it is muted.
    pub fn load(config: &MainConfig, audio: Rc<dyn AudioBackend>) -> Result<Self> {
        for channel in &config.audio_channels {
            audio
                .set_volume(channel.channel_id, channel.volume)
                .map_err(|e| VaderError::playback(channel.channel_id, e.0))?;
        }

        let mut bank = Self {
            quotes: Vec::with_capacity(config.quotes.len()),
            singles: HashMap::new(),
        };

        for (kind, sounds) in [
            ("quotes", &config.quotes),
            ("songs", &config.songs),
            ("sound effects", &config.sound_effects),
        ] {
            tracing::info!("Loading {kind}...");
            for entry in sounds {
                let handle = Self::load_one(config, entry, Rc::clone(&audio))?;
                bank.insert(handle, kind == "quotes")?;
            }
        }

        if bank.quotes.is_empty() {
            return Err(VaderError::config("at least one quote is required"));
        }

        if let Some(ambient) = bank.singles.get(AMBIENT_SOUND) {
            if !ambient.is_muted() {
                tracing::info!(sound = %ambient.name(), "starting ambient sound");
                if let Err(err) = ambient.play(Repeat::Forever) {
                    tracing::warn!("{err}");
                }
            }
        }
        Ok(bank)
    }

    fn load_one(
        config: &MainConfig,
        entry: &SoundEntry,
        audio: Rc<dyn AudioBackend>,
    ) -> Result<SoundHandle> {
        let path = config.sound_path(entry);
        if !path.is_file() {
            return Err(VaderError::MissingAsset { path });
        }

        tracing::info!("Loading \"{}\"", entry.name);
        let sample = audio.load(&path).map_err(|e| {
            VaderError::playback(entry.audio_channel_id, format!("cannot load `{}`: {e}", entry.id))
        })?;
        Ok(SoundHandle {
            id: entry.id.clone(),
            name: entry.name.clone(),
            path,
            channel: entry.audio_channel_id,
            mute: entry.mute,
            default_repeat: entry.repeat()?.unwrap_or(Repeat::Once),
            sample,
            audio,
        })
    }

    fn insert(&mut self, handle: SoundHandle, quote: bool) -> Result<()> {
        let duplicate = self.singles.contains_key(handle.id())
            || self.quotes.iter().any(|q| q.id() == handle.id());
        if duplicate {
            return Err(VaderError::config(format!("duplicate sound `{}`", handle.id())));
        }
        if quote {
            self.quotes.push(handle);
        } else {
            self.singles.insert(handle.id.clone(), handle);
        }
        Ok(())
    }

    /// Quote at `index`, wrapping around the number of quotes.
    pub fn quote(&self, index: usize) -> &SoundHandle {
        &self.quotes[index % self.quotes.len()]
    }

    pub fn quote_count(&self) -> usize {
        self.quotes.len()
    }

    /// Non-quote sound by identifier.
    pub fn get(&self, id: &str) -> Result<&SoundHandle> {
        self.singles
            .get(id)
            .ok_or_else(|| VaderError::UnknownSound(id.to_string()))
    }

    /// Like [`get`](Self::get) for sounds that may legitimately be absent.
    pub fn find(&self, id: &str) -> Option<&SoundHandle> {
        self.singles.get(id)
    }
}
