//! Audio device integration using rodio.
//!
//! Every channel owns at most one [`Sink`]. Playing on a channel drops the
//! previous sink, which stops whatever it was playing.

use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

use parking_lot::Mutex;
use rodio::{source::Buffered, Decoder, OutputStream, OutputStreamHandle, Sink, Source};

use super::{AudioBackend, AudioChannelId, PlatformError, PlatformResult, Repeat, SampleId};

type Sample = Buffered<Decoder<BufReader<File>>>;

struct Device {
    _stream: OutputStream,
    handle: OutputStreamHandle,
}

struct ChannelState {
    volume: f32,
    sink: Option<Sink>,
}

/// Playback on the default system output device.
#[derive(Default)]
pub struct RodioAudio {
    device: Mutex<Option<Device>>,
    samples: Mutex<Vec<Sample>>,
    channels: Mutex<HashMap<AudioChannelId, ChannelState>>,
}

impl RodioAudio {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioBackend for RodioAudio {
    fn init(&self) -> PlatformResult<()> {
        let mut device = self.device.lock();
        if device.is_none() {
            let (stream, handle) = OutputStream::try_default()
                .map_err(|e| PlatformError::new(format!("failed to open audio device: {e}")))?;
            *device = Some(Device {
                _stream: stream,
                handle,
            });
        }
        Ok(())
    }

    fn set_volume(&self, channel: AudioChannelId, volume: f32) -> PlatformResult<()> {
        let mut channels = self.channels.lock();
        let state = channels.entry(channel).or_insert_with(|| ChannelState {
            volume: 1.0,
            sink: None,
        });
        state.volume = volume;
        if let Some(sink) = &state.sink {
            sink.set_volume(volume);
        }
        Ok(())
    }

    fn load(&self, path: &Path) -> PlatformResult<SampleId> {
        let file = File::open(path)
            .map_err(|e| PlatformError::new(format!("cannot open {}: {e}", path.display())))?;
        let decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| PlatformError::new(format!("cannot decode {}: {e}", path.display())))?;
        let mut samples = self.samples.lock();
        samples.push(decoder.buffered());
        Ok(SampleId(samples.len() - 1))
    }

    fn play(
        &self,
        channel: AudioChannelId,
        sample: SampleId,
        repeat: Repeat,
    ) -> PlatformResult<()> {
        let source = self
            .samples
            .lock()
            .get(sample.0)
            .cloned()
            .ok_or_else(|| PlatformError::new(format!("unknown sample {}", sample.0)))?;

        let device = self.device.lock();
        let device = device
            .as_ref()
            .ok_or_else(|| PlatformError::new("mixer not initialized"))?;
        let sink = Sink::try_new(&device.handle)
            .map_err(|e| PlatformError::new(format!("failed to create audio sink: {e}")))?;

        match repeat {
            Repeat::Forever => sink.append(source.repeat_infinite()),
            Repeat::Once => sink.append(source),
            Repeat::Extra(extra) => {
                for _ in 0..=extra {
                    sink.append(source.clone());
                }
            }
        }

        let mut channels = self.channels.lock();
        let state = channels.entry(channel).or_insert_with(|| ChannelState {
            volume: 1.0,
            sink: None,
        });
        sink.set_volume(state.volume);
        if let Some(previous) = state.sink.replace(sink) {
            previous.stop();
        }
        Ok(())
    }

    fn stop(&self, channel: AudioChannelId) -> PlatformResult<()> {
        if let Some(sink) = self
            .channels
            .lock()
            .get_mut(&channel)
            .and_then(|state| state.sink.take())
        {
            sink.stop();
        }
        Ok(())
    }

    fn quit(&self) {
        for state in self.channels.lock().values_mut() {
            if let Some(sink) = state.sink.take() {
                sink.stop();
            }
        }
        self.samples.lock().clear();
        self.device.lock().take();
    }
}
