use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("dbus error")]
    DbusError(#[from] zbus::Error),
    #[error("dbus call failed")]
    DbusCallError(#[from] zbus::fdo::Error),
    #[error("invalid dbus name")]
    DbusNameError(#[from] zbus::names::Error),
    #[error("no free bus name below {0}")]
    NameUnavailable(String),
    #[error("object path {0} is already in use")]
    PathTaken(String),
    #[error("nothing is exported at {0}")]
    NotExported(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("operation was cancelled")]
    Cancelled,
    #[error(transparent)]
    Pixmap(#[from] crate::pixmap::PixmapError),
    #[error("legacy tray error: {0}")]
    Tray(String),
}

impl Error {
    /// Cancellation of a superseded operation, which callers discard silently.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
