//! Telnet transport over a plain TCP socket.
//!
//! Bytes pass through untouched: no option negotiation and no control
//! character handling. Devices that insist on negotiation are not supported.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::config::TelnetConfig;
use super::reachability::wait_reachable;
use super::{CommandOutput, DEFAULT_LINE_ENDING, Session, SessionState};
use crate::channel::{PromptIo, PromptWaiter, RowCallback};
use crate::error::{ChannelError, CommandError, ConfigError, Error, Result, TransportError};

struct TelnetStream {
    stream: TcpStream,
}

impl PromptIo for TelnetStream {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await.map_err(TransportError::Io)?;
        Ok(())
    }

    async fn receive(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        match self.stream.try_read(&mut buf) {
            Ok(0) => Err(ChannelError::Closed.into()),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(TransportError::Io(e).into()),
        }
    }
}

/// Telnet session to a device.
///
/// Connects lazily on first use and authenticates through a login dialog
/// callback that answers the device's username and password prompts.
pub struct TelnetSession {
    config: TelnetConfig,
    login_dialog: Option<Arc<dyn RowCallback>>,
    stream: Option<TelnetStream>,
    prompt: String,
    at_prompt: bool,
    state: SessionState,
}

impl TelnetSession {
    /// Create a disconnected session.
    pub fn new(config: TelnetConfig) -> Self {
        Self {
            prompt: config.prompt.clone(),
            config,
            login_dialog: None,
            stream: None,
            at_prompt: false,
            state: SessionState::Disconnected,
        }
    }

    /// Row callback that drives the login exchange.
    ///
    /// It must answer the credential prompts and return
    /// [`RowOutcome::Stop`](crate::channel::RowOutcome::Stop) on an
    /// authentication failure; see [`login_dialog`](crate::channel::login_dialog).
    pub fn with_login_dialog(mut self, dialog: Arc<dyn RowCallback>) -> Self {
        self.login_dialog = Some(dialog);
        self
    }

    /// Configuration used for this session.
    pub fn config(&self) -> &TelnetConfig {
        &self.config
    }

    /// Connect unless already connected.
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.open_connection().await
    }

    async fn open_connection(&mut self) -> Result<()> {
        let dialog = self
            .login_dialog
            .clone()
            .ok_or_else(|| ConfigError::MissingLoginDialog {
                host: self.config.host.clone(),
            })?;

        self.state = SessionState::Connecting;
        match self.login(dialog.as_ref()).await {
            Ok(stream) => {
                info!("Telnet connection to {}:{} is now open", self.config.host, self.config.port);
                self.stream = Some(stream);
                self.at_prompt = true;
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        let host = &self.config.host;
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), self.config.port))
            .await
            .map_err(|e| {
                debug!("Resolving {}: {}", host, e);
                TransportError::Resolve { host: host.clone() }
            })?
            .collect();

        let Some(first) = addrs.first() else {
            return Err(TransportError::Resolve { host: host.clone() }.into());
        };
        if addrs.len() > 1 {
            info!("{} resolves to {} addresses, using {}", host, addrs.len(), first);
        }
        Ok(*first)
    }

    async fn login(&self, dialog: &dyn RowCallback) -> Result<TelnetStream> {
        let addr = self.resolve().await?;
        let timeout = self.config.timeout;
        debug!("Opening Telnet connection to {}", addr);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|source| TransportError::ConnectionFailed {
                host: self.config.host.clone(),
                port: self.config.port,
                source,
            })?;
        let mut stream = TelnetStream { stream };

        let wait = PromptWaiter::new(&self.prompt)
            .timeout(timeout)
            .poll_interval(self.config.poll_interval)
            .callback(dialog)
            .wait(&mut stream)
            .await?;

        if !wait.reached_prompt {
            warn!("Login to {} failed: {:?}", self.config.host, wait.text.trim());
            return Err(TransportError::LoginFailed {
                host: self.config.host.clone(),
            }
            .into());
        }
        Ok(stream)
    }

    fn drop_connection(&mut self) {
        self.stream = None;
        self.at_prompt = false;
        self.state = SessionState::Disconnected;
    }
}

#[async_trait]
impl Session for TelnetSession {
    async fn connect(&mut self) -> Result<()> {
        self.ensure_connected().await
    }

    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let stdout = self.run_interactive(command, timeout, None, None).await?;
        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
            exit_status: None,
        })
    }

    async fn run_interactive(
        &mut self,
        command: &str,
        timeout: Duration,
        callback: Option<&dyn RowCallback>,
        line_ending: Option<&str>,
    ) -> Result<String> {
        debug!("Telnet command: {}", command);
        self.wait_prompt(timeout).await?;

        let line = format!("{}{}", command, line_ending.unwrap_or(DEFAULT_LINE_ENDING));
        let poll_interval = self.config.poll_interval;
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        self.at_prompt = false;
        stream.send(line.as_bytes()).await?;

        let wait = PromptWaiter::new(&self.prompt)
            .timeout(timeout)
            .poll_interval(poll_interval)
            .min_input_length(command.len() + 1)
            .maybe_callback(callback)
            .wait(stream)
            .await?;

        self.at_prompt = wait.reached_prompt;
        debug!("Data for command {}:\n{}", command, wait.text);
        Ok(wait.text)
    }

    async fn upload(&mut self, _data: &[u8], _filename: &str) -> Result<()> {
        Err(CommandError::NotSupported {
            operation: "upload",
            transport: "Telnet",
        }
        .into())
    }

    async fn wait_prompt(&mut self, timeout: Duration) -> Result<()> {
        self.ensure_connected().await?;
        if self.at_prompt {
            return Ok(());
        }

        let poll_interval = self.config.poll_interval;
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let wait = PromptWaiter::new(&self.prompt)
            .timeout(timeout)
            .poll_interval(poll_interval)
            .wait(stream)
            .await?;

        self.at_prompt = wait.reached_prompt;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stream.shutdown().await {
                debug!("Closing Telnet connection to {}: {}", self.config.host, e);
            }
        }
        self.drop_connection();
        self.reset_prompt();
        Ok(())
    }

    async fn reopen(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let policy = self.config.reconnect.clone();
        let failed = || TransportError::ReconnectFailed {
            host: self.config.host.clone(),
            port: self.config.port,
            timeout,
        };

        if !wait_reachable(&self.config.host, self.config.port, deadline, &policy).await {
            return Err(failed().into());
        }

        loop {
            self.drop_connection();
            match self.open_connection().await {
                Ok(()) => return Ok(()),
                // Wrong credentials will not fix themselves.
                Err(e @ Error::Transport(TransportError::LoginFailed { .. })) => return Err(e),
                Err(e) => {
                    if Instant::now() + policy.retry_interval >= deadline {
                        warn!("Giving up reconnecting to {}: {}", self.config.host, e);
                        return Err(TransportError::ReconnectFailed {
                            host: self.config.host.clone(),
                            port: self.config.port,
                            timeout,
                        }
                        .into());
                    }
                    debug!("Reconnect to {} failed: {}", self.config.host, e);
                    tokio::time::sleep(policy.retry_interval).await;
                }
            }
        }
    }

    async fn expect_disconnect(&mut self, timeout: Duration) -> Result<()> {
        info!("Expecting {} to disconnect", self.config.host);
        self.close().await?;
        tokio::time::sleep(self.config.reconnect.grace).await;
        self.reopen(timeout).await
    }

    fn prompt(&self) -> &str {
        &self.prompt
    }

    fn set_prompt(&mut self, prompt: &str) {
        self.prompt = prompt.to_string();
    }

    fn reset_prompt(&mut self) {
        self.prompt = self.config.prompt.clone();
    }

    fn is_at_prompt(&self) -> bool {
        self.at_prompt
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn address(&self) -> &str {
        &self.config.host
    }
}
