//! The user's configuration file: bootstrap, path resolution, edit and reset.

use std::{
    ffi::OsString,
    fs,
    io,
    path::{Path, PathBuf},
    process::Command,
};

use vader_prop_core::{MainConfig, Result, VaderError, DEFAULT_CONFIG_JSON};

/// Directory holding the sound files when the configuration leaves it empty,
/// relative to the configuration file.
const DEFAULT_SOUNDS_DIR: &str = "sounds";

/// Creates `path` from the factory default if it does not exist yet.
///
/// Returns `true` when the file was created.
pub fn ensure_exists(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, DEFAULT_CONFIG_JSON)?;
    tracing::info!(path = %path.display(), "created configuration file from the factory default");
    Ok(true)
}

/// Loads the configuration at `path`, creating it first if needed, and makes
/// its sounds directory absolute.
pub fn load(path: &Path) -> Result<MainConfig> {
    ensure_exists(path)?;
    let mut config = MainConfig::load(path)?;
    config.sounds_directory = resolve_sounds_directory(path, &config.sounds_directory);
    tracing::debug!(
        sounds_directory = %config.sounds_directory.display(),
        "configuration loaded"
    );
    Ok(config)
}

/// Expands a leading `~` to the home directory. An empty directory means the
/// `sounds` directory next to the configuration file.
pub fn resolve_sounds_directory(config_path: &Path, configured: &Path) -> PathBuf {
    if configured.as_os_str().is_empty() {
        let base = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        return base.join(DEFAULT_SOUNDS_DIR);
    }
    expand_home(configured, home_dir().as_deref())
}

fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

/// Opens the configuration file in an editor and waits for it to return.
///
/// Uses `app` if given, then `$VISUAL`, then `$EDITOR`, then the platform's
/// default opener.
pub fn edit(path: &Path, app: Option<&str>) -> Result<()> {
    ensure_exists(path)?;
    let editor = app
        .map(str::to_string)
        .or_else(|| env_command("VISUAL"))
        .or_else(|| env_command("EDITOR"));

    let mut command = match &editor {
        Some(editor) => command_line(editor, path),
        None => platform_opener(path),
    };
    tracing::info!("Opening the main configuration file ...");
    let status = match command.status() {
        Err(err) if err.kind() == io::ErrorKind::NotFound && cfg!(target_os = "macos") => {
            // Application bundles such as `TextEdit` are not executables.
            let app = editor.as_deref().unwrap_or_default();
            Command::new("open").arg("-a").arg(app).arg(path).status()?
        }
        result => result?,
    };
    if !status.success() {
        return Err(VaderError::config(format!(
            "editor `{}` failed with {status}",
            editor.as_deref().unwrap_or("default application")
        )));
    }
    Ok(())
}

/// Overwrites the configuration file with the factory default. A previous
/// file is kept next to it with a `.bak` suffix.
pub fn reset(path: &Path) -> Result<Option<PathBuf>> {
    let backup = if path.exists() {
        let backup = backup_path(path);
        fs::copy(path, &backup)?;
        tracing::info!(backup = %backup.display(), "previous configuration saved");
        Some(backup)
    } else {
        None
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, DEFAULT_CONFIG_JSON)?;
    tracing::info!(path = %path.display(), "configuration reset to the factory default");
    Ok(backup)
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".bak");
    PathBuf::from(name)
}

fn env_command(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|value| !value.trim().is_empty())
}

/// `editor` may carry arguments, e.g. `code --wait`.
fn command_line(editor: &str, path: &Path) -> Command {
    let mut parts = editor.split_whitespace();
    let mut command = Command::new(parts.next().unwrap_or(editor));
    command.args(parts).arg(path);
    command
}

fn platform_opener(path: &Path) -> Command {
    if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]).arg(path);
        command
    } else if cfg!(target_os = "macos") {
        let mut command = Command::new("open");
        command.arg(path);
        command
    } else {
        let mut command = Command::new("xdg-open");
        command.arg(path);
        command
    }
}
