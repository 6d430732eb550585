//! Session configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::channel::DEFAULT_POLL_INTERVAL;

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. For testing and lab use only.
    Disabled,
}

/// Authentication method for SSH connections.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// No authentication (for testing only).
    None,

    /// Password authentication.
    Password(SecretString),

    /// Private key authentication.
    PrivateKey {
        /// Path to the private key file.
        path: PathBuf,
        /// Optional passphrase for encrypted keys.
        passphrase: Option<SecretString>,
    },
}

/// How a session waits for a rebooting device to come back.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Pause after closing, so the device has actually gone down.
    pub grace: Duration,

    /// Pause between reachability probes.
    pub retry_interval: Duration,

    /// Timeout of a single TCP probe.
    pub probe_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            retry_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// SSH connection configuration.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    /// Authentication method.
    pub auth: AuthMethod,

    /// Connection timeout.
    pub timeout: Duration,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file.
    pub known_hosts_path: Option<PathBuf>,

    /// Jump host to tunnel through.
    pub jump_host: Option<Box<SshConfig>>,

    /// Prompt the interactive shell shows when idle.
    pub prompt: String,

    /// Terminal width for the shell PTY.
    pub terminal_width: u32,

    /// Terminal height for the shell PTY.
    pub terminal_height: u32,

    /// Delay between empty polls while waiting for the prompt.
    pub poll_interval: Duration,

    /// Reconnect behaviour after reboots.
    pub reconnect: ReconnectPolicy,
}

impl SshConfig {
    /// Configuration with defaults for everything but host and username.
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            auth: AuthMethod::None,
            timeout: Duration::from_secs(30),
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            jump_host: None,
            prompt: ">".to_string(),
            terminal_width: 511,
            terminal_height: 24,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Telnet connection configuration.
#[derive(Debug, Clone)]
pub struct TelnetConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// Telnet port (default: 23).
    pub port: u16,

    /// Connect and login timeout.
    pub timeout: Duration,

    /// Prompt the shell shows when idle.
    pub prompt: String,

    /// Delay between empty polls while waiting for the prompt.
    pub poll_interval: Duration,

    /// Reconnect behaviour after reboots.
    pub reconnect: ReconnectPolicy,
}

impl TelnetConfig {
    /// Configuration with defaults for everything but the host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 23,
            timeout: Duration::from_secs(30),
            prompt: ">".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}
