//! Error types for netcommand.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for netcommand operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level errors (connect, handshake, auth, tunnel, reconnect)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel operation errors (prompt timeouts, closed channels)
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Device replied with an error, or a success marker was missing
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Malformed version string
    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    /// Image lookup errors
    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// True for idle timeouts in the prompt engine and transport timeouts.
    ///
    /// Commands that reboot the device are expected to time out, callers
    /// use this to tell that case apart from real failures.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Channel(ChannelError::PromptTimeout(_))
                | Error::Transport(TransportError::Timeout(_))
        )
    }

    /// True when the remote end went away underneath an operation.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::Channel(ChannelError::Closed)
                | Error::Channel(ChannelError::Ssh(_))
                | Error::Transport(TransportError::Disconnected)
                | Error::Transport(TransportError::Ssh(_))
        )
    }
}

/// Transport layer errors (SSH/Telnet connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// DNS resolution returned nothing
    #[error("Could not resolve {host}")]
    Resolve { host: String },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host key is not in known_hosts and verification is strict
    #[error("Host key for {host}:{port} is unknown")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the known_hosts entry
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// The jump host refused to open a tunnel to the target
    #[error("Tunnel via {jump_host} to {host}:{port} failed: {source}")]
    Tunnel {
        jump_host: String,
        host: String,
        port: u16,
        #[source]
        source: russh::Error,
    },

    /// Telnet login dialog never reached the prompt
    #[error("Login to {host} failed")]
    LoginFailed { host: String },

    /// Device did not come back within the reconnect deadline
    #[error("Failed to reconnect to {host}:{port} within {timeout:?}")]
    ReconnectFailed {
        host: String,
        port: u16,
        timeout: Duration,
    },

    /// Operation attempted on a session that is not connected
    #[error("Session not connected")]
    NotConnected,

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Channel layer errors.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Failed to open the interactive shell
    #[error("Failed to open shell channel")]
    ShellOpenFailed,

    /// No new bytes arrived within the idle budget
    #[error("Prompt not seen within {0:?}")]
    PromptTimeout(Duration),

    /// Channel closed unexpectedly
    #[error("Channel closed")]
    Closed,

    /// SSH protocol error on the channel
    #[error("Channel SSH error: {0}")]
    Ssh(russh::Error),

    /// SFTP subsystem error
    #[error("SFTP error: {0}")]
    Sftp(String),
}

/// Command execution errors reported by the device or the model.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Device output contained an error marker, or lacked a success marker
    #[error("Command failed: {message}")]
    Failed { message: String },

    /// Operation is not available on this transport
    #[error("{operation} is not supported by {transport} sessions")]
    NotSupported {
        operation: &'static str,
        transport: &'static str,
    },

    /// The model cannot install this kind of image
    #[error("Model '{model}' cannot handle image: {reason}")]
    UnsupportedImage { model: String, reason: String },
}

impl CommandError {
    /// Shorthand for a [`CommandError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        CommandError::Failed {
            message: message.into(),
        }
    }
}

/// Version parsing errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VersionError {
    /// A dotted segment was not a non-negative integer
    #[error("Invalid version number '{version}': segment '{segment}' is not numeric")]
    InvalidSegment { version: String, segment: String },
}

/// Image lookup errors.
#[derive(Error, Debug)]
pub enum ImageError {
    /// More than one file matched the requested name
    #[error("Multiple files match '{filename}' in {directory}")]
    Ambiguous { filename: String, directory: String },

    /// The search pattern was invalid
    #[error("Invalid image pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// Reading the image failed
    #[error("I/O error reading image: {0}")]
    Io(#[from] io::Error),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Generic invalid configuration
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    /// Telnet sessions need a login dialog to authenticate
    #[error("Telnet session to {host} has no login dialog")]
    MissingLoginDialog { host: String },

    /// No model registered under this name
    #[error("Model '{name}' is not supported")]
    UnknownModel { name: String },

    /// A model with this name is already registered
    #[error("Model '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Result type alias using netcommand's Error.
pub type Result<T> = std::result::Result<T, Error>;
