mod config_file;
mod signals;
mod terminal;

use std::{
    io::{self, IsTerminal, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    rc::Rc,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vader_prop_core::{
    platform::sim::SimulatedGpio,
    run_activation_session, AudioBackend, Gpio, Platform, StopToken, SystemClock,
};

use crate::terminal::TerminalGpio;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let code = match cli.command.unwrap_or(Commands::Activate) {
        Commands::Activate => run_activate(&cli.config),
        Commands::Edit { app } => report(config_file::edit(&cli.config, app.as_deref())),
        Commands::Reset => report(config_file::reset(&cli.config).map(|_| ())),
    };

    if code == 0 {
        tracing::info!("Program exited with {code}");
    } else {
        tracing::error!("Program exited with {code}");
    }
    ExitCode::from(code)
}

fn run_activate(config_path: &Path) -> u8 {
    let config = match config_file::load(config_path).and_then(|config| {
        config.validate()?;
        config.check_sound_files()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("{}: {err}", err.kind());
            return 1;
        }
    };

    let interrupt = StopToken::new();
    if let Err(err) = signals::spawn_listener(interrupt.clone()) {
        tracing::warn!("cannot install the signal listener: {err}");
    }

    let gpio: Arc<dyn Gpio> = if io::stdin().is_terminal() && io::stdout().is_terminal() {
        let gpio = TerminalGpio::new(&config.gpio_channels, interrupt.clone());
        tracing::info!("Keys: {}", gpio.key_hints());
        Arc::new(gpio)
    } else {
        tracing::warn!("not attached to a terminal, buttons cannot be pressed");
        Arc::new(SimulatedGpio::new())
    };
    let platform = Platform::new(gpio, audio_backend(), Arc::new(SystemClock::new()));

    let status = run_activation_session(&config, platform, &interrupt);
    u8::try_from(status.code()).unwrap_or(1)
}

fn report(result: vader_prop_core::Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!("{}: {err}", err.kind());
            1
        }
    }
}

#[cfg(feature = "playback")]
fn audio_backend() -> Rc<dyn AudioBackend> {
    Rc::new(vader_prop_core::platform::rodio_audio::RodioAudio::new())
}

#[cfg(not(feature = "playback"))]
fn audio_backend() -> Rc<dyn AudioBackend> {
    tracing::warn!("built without the `playback` feature, sounds are simulated");
    Rc::new(vader_prop_core::platform::sim::SimulatedAudio::new())
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let crlf = io::stderr().is_terminal();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(move || LogWriter { crlf })
        .try_init();
}

/// Log sink on stderr. The terminal GPIO puts the terminal in raw mode, where
/// a bare line feed does not return the cursor.
struct LogWriter {
    crlf: bool,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut stderr = io::stderr().lock();
        if self.crlf {
            for chunk in buf.split_inclusive(|&b| b == b'\n') {
                match chunk.strip_suffix(b"\n") {
                    Some(line) => {
                        stderr.write_all(line)?;
                        stderr.write_all(b"\r\n")?;
                    }
                    None => stderr.write_all(chunk)?,
                }
            }
        } else {
            stderr.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Activate the Darth Vader costume prop", long_about = None)]
struct Cli {
    /// Turn logging off.
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Log debugging information.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Main configuration file, created from the factory default if missing.
    #[arg(long, env = "VADER_CONFIG", default_value = "vader.json", global = true)]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Turn on the LEDs and react to the buttons (default).
    Activate,
    /// Open the configuration file in an editor.
    Edit {
        /// Application used instead of `$VISUAL`, `$EDITOR` or the default opener.
        #[arg(short, long)]
        app: Option<String>,
    },
    /// Restore the factory configuration, keeping a `.bak` of the current one.
    Reset,
}
