//! Builder for creating device sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use super::config::{AuthMethod, HostKeyVerification, ReconnectPolicy, SshConfig, TelnetConfig};
use super::{Session, SshSession, TelnetSession};
use crate::channel::{DEFAULT_POLL_INTERVAL, RowCallback, login_dialog};
use crate::error::{ConfigError, Result};

/// Wire protocol of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    #[default]
    Ssh,
    Telnet,
}

impl TransportKind {
    /// Well-known port of the protocol.
    pub fn default_port(self) -> u16 {
        match self {
            TransportKind::Ssh => 22,
            TransportKind::Telnet => 23,
        }
    }
}

/// Builder for constructing device sessions.
///
/// # Example
///
/// ```rust,no_run
/// use netcommand::transport::SessionBuilder;
///
/// # async fn example() -> Result<(), netcommand::Error> {
/// let mut session = SessionBuilder::new("192.168.1.1")
///     .username("admin")
///     .password("secret")
///     .prompt("#")
///     .connect()
///     .await?;
///
/// let output = session
///     .run_interactive("show version", std::time::Duration::from_secs(10), None, None)
///     .await?;
/// println!("{}", output);
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    host: String,
    port: Option<u16>,
    kind: TransportKind,
    username: Option<String>,
    password: Option<SecretString>,
    auth: AuthMethod,
    prompt: String,
    timeout: Duration,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    jump_host: Option<SshConfig>,
    login_dialog: Option<Arc<dyn RowCallback>>,
    poll_interval: Duration,
    reconnect: ReconnectPolicy,
    terminal_width: u32,
    terminal_height: u32,
}

impl SessionBuilder {
    /// Create a new session builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            kind: TransportKind::Ssh,
            username: None,
            password: None,
            auth: AuthMethod::None,
            prompt: ">".to_string(),
            timeout: Duration::from_secs(30),
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            jump_host: None,
            login_dialog: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect: ReconnectPolicy::default(),
            terminal_width: 511,
            terminal_height: 24,
        }
    }

    /// Select the transport (default: SSH).
    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the port (default: 22 for SSH, 23 for Telnet).
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the username for authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        let password = SecretString::from(password.into());
        self.auth = AuthMethod::Password(password.clone());
        self.password = Some(password);
        self
    }

    /// Set private key authentication.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.auth = AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: None,
        };
        self
    }

    /// Set private key authentication with passphrase.
    pub fn private_key_with_passphrase(
        mut self,
        key_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.auth = AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: Some(SecretString::from(passphrase.into())),
        };
        self
    }

    /// Prompt the shell shows when idle (default: `>`).
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Set the connection timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the host key verification mode (default: accept new).
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Use a specific known_hosts file.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Tunnel the SSH connection through a jump host.
    pub fn jump_host(mut self, jump: SshConfig) -> Self {
        self.jump_host = Some(jump);
        self
    }

    /// Login dialog for Telnet sessions.
    ///
    /// Without one, a Telnet session built with a username and password
    /// uses [`login_dialog`].
    pub fn login_dialog(mut self, dialog: Arc<dyn RowCallback>) -> Self {
        self.login_dialog = Some(dialog);
        self
    }

    /// Delay between empty polls while waiting for the prompt.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Reconnect behaviour after reboots.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set terminal dimensions.
    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal_width = width;
        self.terminal_height = height;
        self
    }

    /// Build the SSH configuration.
    pub fn ssh_config(self) -> Result<SshConfig> {
        let username = self.username.ok_or_else(|| ConfigError::Invalid {
            message: "Username is required for SSH".to_string(),
        })?;

        Ok(SshConfig {
            port: self.port.unwrap_or(TransportKind::Ssh.default_port()),
            username,
            auth: self.auth,
            timeout: self.timeout,
            host_key_verification: self.host_key_verification,
            known_hosts_path: self.known_hosts_path,
            jump_host: self.jump_host.map(Box::new),
            prompt: self.prompt,
            terminal_width: self.terminal_width,
            terminal_height: self.terminal_height,
            poll_interval: self.poll_interval,
            reconnect: self.reconnect,
            host: self.host,
        })
    }

    /// Build the session without connecting.
    pub fn build(self) -> Result<Box<dyn Session>> {
        match self.kind {
            TransportKind::Ssh => Ok(Box::new(SshSession::new(self.ssh_config()?))),
            TransportKind::Telnet => {
                let credentials = (self.login_dialog, self.username, self.password);
                let dialog: Arc<dyn RowCallback> = match credentials {
                    (Some(dialog), _, _) => dialog,
                    (None, Some(username), Some(password)) => {
                        Arc::new(login_dialog(&username, password.expose_secret()))
                    }
                    _ => {
                        return Err(ConfigError::MissingLoginDialog { host: self.host }.into());
                    }
                };

                let config = TelnetConfig {
                    port: self.port.unwrap_or(TransportKind::Telnet.default_port()),
                    timeout: self.timeout,
                    prompt: self.prompt,
                    poll_interval: self.poll_interval,
                    reconnect: self.reconnect,
                    host: self.host,
                };
                Ok(Box::new(TelnetSession::new(config).with_login_dialog(dialog)))
            }
        }
    }

    /// Build the session and connect SSH sessions right away.
    ///
    /// Telnet sessions still connect on first use.
    pub async fn connect(self) -> Result<Box<dyn Session>> {
        let kind = self.kind;
        let mut session = self.build()?;
        if kind == TransportKind::Ssh {
            session.connect().await?;
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::transport::SessionState;

    #[test]
    fn test_ssh_requires_username() {
        let err = SessionBuilder::new("10.0.0.1").build().err().unwrap();
        assert!(matches!(err, Error::Config(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_ssh_config_defaults() {
        let jump = SshConfig::new("bastion", "ops");
        let config = SessionBuilder::new("10.0.0.1")
            .username("admin")
            .password("secret")
            .prompt("#")
            .jump_host(jump)
            .ssh_config()
            .unwrap();

        assert_eq!(config.port, 22);
        assert_eq!(config.prompt, "#");
        assert!(matches!(config.auth, AuthMethod::Password(_)));
        assert_eq!(config.jump_host.unwrap().host, "bastion");
    }

    #[test]
    fn test_telnet_uses_credentials_as_login_dialog() {
        let session = SessionBuilder::new("10.0.0.2")
            .transport(TransportKind::Telnet)
            .username("admin")
            .password("secret")
            .prompt("#")
            .build()
            .unwrap();

        assert_eq!(session.address(), "10.0.0.2");
        assert_eq!(session.prompt(), "#");
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_telnet_without_credentials_is_rejected() {
        let err = SessionBuilder::new("10.0.0.2")
            .transport(TransportKind::Telnet)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(ConfigError::MissingLoginDialog { .. })));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(TransportKind::Ssh.default_port(), 22);
        assert_eq!(TransportKind::Telnet.default_port(), 23);
    }
}
