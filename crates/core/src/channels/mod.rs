//! Named GPIO channels and the lines they are claimed on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{config::GpioChannelEntry, platform::Gpio, Result, VaderError};

/// What a GPIO line is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    Led,
    Button,
}

impl ChannelRole {
    /// Role implied by a channel identifier: `*_led` drives an LED, anything
    /// else reads a button.
    pub fn infer(channel_id: &str) -> Self {
        if channel_id.ends_with("_led") {
            Self::Led
        } else {
            Self::Button
        }
    }
}

/// A configured GPIO line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub id: String,
    pub role: ChannelRole,
    pub line: u32,
    pub name: String,
    /// Keyboard key that stands in for the button when simulating.
    pub key: Option<String>,
    /// Symbol shown for a lit LED when simulating.
    pub symbol: Option<String>,
}

impl ChannelDescriptor {
    pub fn from_entry(entry: &GpioChannelEntry) -> Self {
        Self {
            id: entry.channel_id.clone(),
            role: entry.role(),
            line: entry.channel_number,
            name: entry.channel_name.clone(),
            key: entry.key.clone(),
            symbol: entry.led_symbol.clone(),
        }
    }

    pub fn is_led(&self) -> bool {
        self.role == ChannelRole::Led
    }
}

/// Every GPIO channel of the prop, keyed by identifier.
///
/// Built once per session; read-only afterwards.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, ChannelDescriptor>,
}

impl ChannelRegistry {
    /// Configures every line on `gpio` according to its role and indexes the
    /// resulting descriptors.
    pub fn build(entries: &[GpioChannelEntry], gpio: &dyn Gpio) -> Result<Self> {
        let mut channels = BTreeMap::new();
        for entry in entries {
            let descriptor = ChannelDescriptor::from_entry(entry);
            if channels.contains_key(&descriptor.id) {
                return Err(VaderError::config(format!(
                    "duplicate GPIO channel `{}`",
                    descriptor.id
                )));
            }

            let setup = match descriptor.role {
                ChannelRole::Led => gpio.setup_output(descriptor.line),
                ChannelRole::Button => gpio.setup_input_pull_up(descriptor.line),
            };
            setup.map_err(|e| VaderError::hardware(&descriptor.id, descriptor.line, e.0))?;

            tracing::debug!(
                channel = %descriptor.id,
                line = descriptor.line,
                role = ?descriptor.role,
                "GPIO line configured"
            );
            channels.insert(descriptor.id.clone(), descriptor);
        }
        Ok(Self { channels })
    }

    pub fn get(&self, id: &str) -> Result<&ChannelDescriptor> {
        self.channels
            .get(id)
            .ok_or_else(|| VaderError::UnknownChannel(id.to_string()))
    }

    /// Line of the channel `id`, which must have the given role.
    pub fn line(&self, id: &str, role: ChannelRole) -> Result<u32> {
        let channel = self.get(id)?;
        if channel.role != role {
            return Err(VaderError::config(format!(
                "GPIO channel `{id}` is a {:?}, expected a {role:?}",
                channel.role
            )));
        }
        Ok(channel.line)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.channels.values()
    }

    pub fn leds(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.iter().filter(|channel| channel.is_led())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
