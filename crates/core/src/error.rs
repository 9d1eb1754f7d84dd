use std::path::PathBuf;

/// Result alias that carries the custom [`VaderError`] type.
pub type Result<T> = std::result::Result<T, VaderError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum VaderError {
    /// The platform refused to configure a GPIO line.
    #[error("cannot set up GPIO line {line} (`{channel}`): {reason}")]
    HardwareInit {
        channel: String,
        line: u32,
        reason: String,
    },
    /// The audio device could not be opened.
    #[error("cannot initialize audio: {0}")]
    AudioInit(String),
    /// A declared sound file does not exist.
    #[error("no such file: {}", path.display())]
    MissingAsset { path: PathBuf },
    /// Unknown sequence name or malformed custom sequence.
    #[error("invalid LED sequence {description}: {reason}")]
    InvalidSequence { description: String, reason: String },
    /// A single `play`/`stop` call failed. Recovered by the caller.
    #[error("playback failed on audio channel {channel}: {reason}")]
    Playback { channel: u16, reason: String },
    /// The LED sequencer task ended with a fault.
    #[error("LED sequencer stopped unexpectedly: {0}")]
    SequencerFault(String),
    #[error("unknown GPIO channel `{0}`")]
    UnknownChannel(String),
    #[error("unknown sound `{0}`")]
    UnknownSound(String),
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl VaderError {
    /// Creates a configuration error that wraps the provided message.
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn hardware(channel: impl Into<String>, line: u32, reason: impl Into<String>) -> Self {
        Self::HardwareInit {
            channel: channel.into(),
            line,
            reason: reason.into(),
        }
    }

    pub fn playback(channel: u16, reason: impl Into<String>) -> Self {
        Self::Playback {
            channel,
            reason: reason.into(),
        }
    }

    pub fn sequence(description: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSequence {
            description: description.into(),
            reason: reason.into(),
        }
    }

    /// Short tag naming the failure class, used in single-line reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HardwareInit { .. } | Self::AudioInit(_) => "HardwareInitError",
            Self::MissingAsset { .. } => "MissingAssetError",
            Self::InvalidSequence { .. } => "InvalidSequenceError",
            Self::Playback { .. } => "PlaybackFault",
            Self::SequencerFault(_) => "SequencerFault",
            Self::UnknownChannel(_) | Self::UnknownSound(_) | Self::InvalidConfig(_) => {
                "ConfigError"
            }
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_diagnostic_context() {
        let err = VaderError::MissingAsset {
            path: PathBuf::from("/sounds/breathing.wav"),
        };
        assert!(err.to_string().contains("/sounds/breathing.wav"));
        assert_eq!(err.kind(), "MissingAssetError");

        let err = VaderError::hardware("top_led", 99, "line already claimed");
        let msg = err.to_string();
        assert!(msg.contains("top_led") && msg.contains("99"));
    }
}
