//! GPIO simulated in the terminal: keyboard keys stand in for the buttons and
//! a status line shows the LEDs.

use std::{
    collections::HashMap,
    fmt::Write as _,
    io::{self, Write as _},
    time::Duration,
};

use crossterm::{
    cursor::MoveToColumn,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    style::Print,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType},
};
use parking_lot::Mutex;
use vader_prop_core::{
    config::GpioChannelEntry,
    platform::PlatformResult,
    ChannelRole, Gpio, Level, PlatformError, StopToken,
};

const LED_OFF_SYMBOL: &str = "⚫";
const LED_ON_FALLBACK: &str = "🟡";

#[derive(Debug, Clone, PartialEq, Eq)]
struct LedLabel {
    line: u32,
    name: String,
    symbol: String,
}

#[derive(Debug, Default)]
struct TerminalState {
    raw_mode: bool,
    claimed: HashMap<u32, ChannelRole>,
    outputs: HashMap<u32, Level>,
    taps: HashMap<u32, u32>,
}

/// [`Gpio`] backed by the terminal.
///
/// The terminal is switched to raw mode when the first line is set up, so
/// Ctrl-C arrives as a key press; it requests `interrupt` instead of killing
/// the process.
#[derive(Debug)]
pub struct TerminalGpio {
    keys: HashMap<char, u32>,
    leds: Vec<LedLabel>,
    interrupt: StopToken,
    state: Mutex<TerminalState>,
}

impl TerminalGpio {
    pub fn new(channels: &[GpioChannelEntry], interrupt: StopToken) -> Self {
        let mut keys = HashMap::new();
        let mut leds = Vec::new();
        for channel in channels {
            match channel.role() {
                ChannelRole::Led => leds.push(LedLabel {
                    line: channel.channel_number,
                    name: channel.channel_name.clone(),
                    symbol: channel
                        .led_symbol
                        .clone()
                        .unwrap_or_else(|| LED_ON_FALLBACK.to_string()),
                }),
                ChannelRole::Button => match channel.key.as_deref().and_then(parse_key) {
                    Some(key) => {
                        keys.insert(key, channel.channel_number);
                    }
                    None => tracing::warn!(
                        channel = %channel.channel_id,
                        "no usable key for this button, it cannot be pressed"
                    ),
                },
            }
        }
        Self {
            keys,
            leds,
            interrupt,
            state: Mutex::new(TerminalState::default()),
        }
    }

    /// Button line bound to `key`.
    pub fn line_for_key(&self, key: char) -> Option<u32> {
        self.keys.get(&key.to_ascii_lowercase()).copied()
    }

    /// One-line help listing the keys, e.g. `l=line 23 s=line 24 | Ctrl-C to quit`.
    pub fn key_hints(&self) -> String {
        let mut keys: Vec<_> = self.keys.iter().collect();
        keys.sort();
        let mut hints = String::new();
        for (key, line) in keys {
            let _ = write!(hints, "{key}=line {line} ");
        }
        hints.push_str("| Ctrl-C to quit");
        hints
    }

    fn claim(&self, line: u32, role: ChannelRole) -> PlatformResult<()> {
        let mut state = self.state.lock();
        if state.claimed.contains_key(&line) {
            return Err(PlatformError::new(format!("line {line} is already claimed")));
        }
        if !state.raw_mode {
            enable_raw_mode()
                .map_err(|e| PlatformError::new(format!("cannot enable raw mode: {e}")))?;
            state.raw_mode = true;
        }
        state.claimed.insert(line, role);
        if role == ChannelRole::Led {
            state.outputs.insert(line, Level::Low);
        }
        Ok(())
    }

    /// Turns pending key presses into button taps.
    fn drain_events(&self, state: &mut TerminalState) -> io::Result<()> {
        while event::poll(Duration::ZERO)? {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    self.interrupt.request();
                }
                KeyCode::Char(c) => {
                    if let Some(line) = self.line_for_key(c) {
                        *state.taps.entry(line).or_default() += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn render(&self, state: &TerminalState) -> io::Result<()> {
        let line = status_line(&self.leds, &state.outputs);
        let mut stdout = io::stdout();
        execute!(
            stdout,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(line)
        )?;
        stdout.flush()
    }
}

impl Gpio for TerminalGpio {
    fn setup_output(&self, line: u32) -> PlatformResult<()> {
        self.claim(line, ChannelRole::Led)
    }

    fn setup_input_pull_up(&self, line: u32) -> PlatformResult<()> {
        self.claim(line, ChannelRole::Button)
    }

    fn write(&self, line: u32, level: Level) -> PlatformResult<()> {
        let mut state = self.state.lock();
        if state.claimed.get(&line) != Some(&ChannelRole::Led) {
            return Err(PlatformError::new(format!("line {line} is not an output")));
        }
        state.outputs.insert(line, level);
        self.render(&state)
            .map_err(|e| PlatformError::new(format!("cannot draw LEDs: {e}")))
    }

    fn read(&self, line: u32) -> PlatformResult<Level> {
        let mut state = self.state.lock();
        if state.claimed.get(&line) != Some(&ChannelRole::Button) {
            return Err(PlatformError::new(format!("line {line} is not an input")));
        }
        self.drain_events(&mut state)
            .map_err(|e| PlatformError::new(format!("cannot read the keyboard: {e}")))?;
        match state.taps.get_mut(&line) {
            Some(taps) if *taps > 0 => {
                *taps -= 1;
                Ok(Level::Low)
            }
            _ => Ok(Level::High),
        }
    }

    fn cleanup(&self) {
        let mut state = self.state.lock();
        if state.raw_mode {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), Print("\r\n"));
            state.raw_mode = false;
        }
        state.claimed.clear();
        state.outputs.clear();
        state.taps.clear();
    }
}

impl Drop for TerminalGpio {
    fn drop(&mut self) {
        if self.state.get_mut().raw_mode {
            let _ = disable_raw_mode();
        }
    }
}

/// A key hint is a single character, case-insensitive.
fn parse_key(hint: &str) -> Option<char> {
    let mut chars = hint.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(key), None) if !key.is_control() => Some(key.to_ascii_lowercase()),
        _ => None,
    }
}

fn status_line(leds: &[LedLabel], outputs: &HashMap<u32, Level>) -> String {
    leds.iter()
        .map(|led| {
            let symbol = match outputs.get(&led.line) {
                Some(Level::High) => led.symbol.as_str(),
                _ => LED_OFF_SYMBOL,
            };
            format!("{symbol} {}", led.name)
        })
        .collect::<Vec<_>>()
        .join("   ")
}
