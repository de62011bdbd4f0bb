//! # OS termination signals.
//!
//! [`wait_for_shutdown_signal`] resolves with the name of the first termination
//! signal received; the name becomes the `ShutdownRequested` reason.
//!
//! | Platform | Signals                                  |
//! |----------|------------------------------------------|
//! | Unix     | `SIGINT`, `SIGTERM`, `SIGQUIT`, `SIGHUP` |
//! | other    | Ctrl-C                                   |

/// Waits for a termination signal and returns its name.
///
/// Listeners are installed on every call; registration failure is returned as `Err`.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
        _ = sighup.recv() => "SIGHUP",
    };
    Ok(name)
}

/// Waits for Ctrl-C.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
