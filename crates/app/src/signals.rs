//! OS signal listener that turns a termination signal into a stop request.
//!
//! ## Unix
//! SIGINT (through [`tokio::signal::ctrl_c`]), SIGTERM and SIGQUIT are
//! handled, and the one that arrived is logged.
//!
//! ## Windows
//! Only [`tokio::signal::ctrl_c`] is awaited.

use std::thread;

use vader_prop_core::StopToken;

/// Starts a background thread that requests `interrupt` on the first
/// shutdown signal.
pub fn spawn_listener(interrupt: StopToken) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("signal-listener".into())
        .spawn(move || {
            runtime.block_on(async {
                match next_shutdown_signal().await {
                    Ok(signal) => {
                        tracing::info!(signal, "shutdown requested");
                        interrupt.request();
                    }
                    Err(err) => tracing::warn!("cannot listen for OS signals: {err}"),
                }
            });
        })?;
    Ok(())
}

/// Waits for the first shutdown signal and names it.
#[cfg(unix)]
async fn next_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    // SIGINT is covered by `ctrl_c`.
    let name = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            "SIGINT"
        }
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn next_shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}
