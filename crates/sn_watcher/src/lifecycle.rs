//! Why and when the watcher stops.
//!
//! Long running loops are built with [`loop_select_exiting!`](crate::loop_select_exiting). They end
//! either on an exit request, such as the one the signal handler sends, or when one of their own
//! branches breaks with an [`ExitCause`].

use std::fmt;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// SIGINT or SIGTERM.
    Signal,
    /// Another watcher took over `org.kde.StatusNotifierWatcher`.
    NameLost,
    /// No consumer came back within the inactivity timeout.
    Inactive,
    /// Handling a bus event failed.
    Failed,
}

impl ExitCause {
    pub fn exit_code(self) -> i32 {
        match self {
            ExitCause::Failed => 1,
            ExitCause::Signal | ExitCause::NameLost | ExitCause::Inactive => 0,
        }
    }
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCause::Signal => write!(f, "received a termination signal"),
            ExitCause::NameLost => write!(f, "lost the watcher name to another instance"),
            ExitCause::Inactive => write!(f, "no consumers left"),
            ExitCause::Failed => write!(f, "failed to handle a bus event"),
        }
    }
}

static EXIT_REQUESTS: Lazy<broadcast::Sender<ExitCause>> = Lazy::new(|| broadcast::channel(2).0);

/// Ask every running [`loop_select_exiting!`](crate::loop_select_exiting) loop to stop.
pub fn request_exit(cause: ExitCause) -> Result<()> {
    EXIT_REQUESTS.send(cause).context("No loop is listening for exit requests")?;
    Ok(())
}

/// Resolves with the cause of the next exit request.
pub async fn exit_requested() -> Result<ExitCause> {
    EXIT_REQUESTS.subscribe().recv().await.context("Failed to receive an exit request")
}

/// Select in a loop until an exit is requested or a branch does `break cause`. Evaluates to the
/// [`ExitCause`](crate::lifecycle::ExitCause) that ended the loop.
#[macro_export]
macro_rules! loop_select_exiting {
    ($($content:tt)*) => {
        loop {
            tokio::select! {
                Ok(cause) = $crate::lifecycle::exit_requested() => {
                    break cause;
                }
                $($content)*
            }
        }
    };
}
