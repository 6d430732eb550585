//! SSH transport implementation using russh.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::FutureExt;
use log::{debug, info, trace, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg};
use russh_sftp::client::SftpSession;
use secrecy::ExposeSecret;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use super::config::{AuthMethod, HostKeyVerification, SshConfig};
use super::reachability::wait_reachable;
use super::{CommandOutput, DEFAULT_LINE_ENDING, Session, SessionState};
use crate::channel::{PromptIo, PromptWaiter, RowCallback};
use crate::error::{ChannelError, Result, TransportError};

/// Interactive PTY shell on an SSH connection.
struct ShellChannel {
    channel: Channel<Msg>,

    /// Bytes received but not yet handed to the engine.
    pending: BytesMut,
}

impl ShellChannel {
    fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            pending: BytesMut::new(),
        }
    }
}

impl PromptIo for ShellChannel {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.channel.data(data).await.map_err(ChannelError::Ssh)?;
        Ok(())
    }

    async fn receive(&mut self, max: usize) -> Result<Vec<u8>> {
        while self.pending.is_empty() {
            // Channel messages sit in an mpsc queue; polling it once is cancel safe.
            match self.channel.wait().now_or_never() {
                None => break,
                Some(Some(ChannelMsg::Data { data })) => self.pending.extend_from_slice(&data),
                Some(Some(ChannelMsg::ExtendedData { data, .. })) => {
                    self.pending.extend_from_slice(&data)
                }
                Some(Some(ChannelMsg::Eof | ChannelMsg::Close)) | Some(None) => {
                    return Err(ChannelError::Closed.into());
                }
                Some(Some(other)) => trace!("Ignoring shell message {:?}", other),
            }
        }

        let len = max.min(self.pending.len());
        Ok(self.pending.split_to(len).to_vec())
    }
}

/// SSH session to a device, optionally tunnelled through a jump host.
///
/// The session owns its jump host session and closes it after its own
/// connection. One-shot commands ([`Session::run`]) use a fresh exec channel
/// each; interactive commands share one PTY shell opened on first use.
pub struct SshSession {
    config: SshConfig,

    /// The russh session handle, present while connected.
    handle: Option<Handle<SshHandler>>,

    shell: Option<ShellChannel>,

    jump: Option<Box<SshSession>>,

    prompt: String,

    at_prompt: bool,

    state: SessionState,
}

/// Remove `SSH_AUTH_SOCK` from the process environment.
///
/// Sessions only authenticate with the credentials in [`SshConfig`], but
/// child processes and other SSH clients in the same program would still
/// pick up a running agent. Call this from `main` before starting the
/// async runtime.
///
/// # Safety
///
/// No other thread may read or write the environment while this runs.
pub unsafe fn clear_agent_socket() {
    if std::env::var_os("SSH_AUTH_SOCK").is_some() {
        // SAFETY: upheld by the caller.
        unsafe { std::env::remove_var("SSH_AUTH_SOCK") };
    }
}

impl SshSession {
    /// Create a disconnected session; the first operation connects.
    pub fn new(config: SshConfig) -> Self {
        let jump = config
            .jump_host
            .as_ref()
            .map(|jump| Box::new(SshSession::new((**jump).clone())));

        Self {
            prompt: config.prompt.clone(),
            config,
            handle: None,
            shell: None,
            jump,
            at_prompt: false,
            state: SessionState::Disconnected,
        }
    }

    /// Create a session and connect it immediately.
    pub async fn open(config: SshConfig) -> Result<Self> {
        let mut session = Self::new(config);
        session.ensure_connected().await?;
        Ok(session)
    }

    /// Configuration used for this session.
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Jump host session, if tunnelled.
    pub fn jump_host(&self) -> Option<&SshSession> {
        self.jump.as_deref()
    }

    /// Connect unless a live connection already exists.
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if let Some(handle) = &self.handle {
            if !handle.is_closed() {
                return Ok(());
            }
            debug!("Connection to {} was closed by the peer", self.config.host);
            self.drop_connection();
        }
        self.open_connection().await
    }

    // Boxed so a jump host session can connect from inside this future.
    fn open_connection(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.state = SessionState::Connecting;
            match self.handshake().await {
                Ok(handle) => {
                    info!(
                        "SSH connection to {}@{} is now open",
                        self.config.username,
                        self.config.socket_addr()
                    );
                    self.handle = Some(handle);
                    self.state = SessionState::Connected;
                    Ok(())
                }
                Err(e) => {
                    self.state = SessionState::Disconnected;
                    Err(e)
                }
            }
        })
    }

    async fn handshake(&mut self) -> Result<Handle<SshHandler>> {
        let ssh_config = Arc::new(client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            host: self.config.host.clone(),
            port: self.config.port,
            host_key_verification: self.config.host_key_verification.clone(),
            known_hosts_path: self.config.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        let timeout = self.config.timeout;
        let host = self.config.host.clone();
        let port = self.config.port;

        let connected = match self.jump.as_mut() {
            Some(jump) => {
                jump.ensure_connected().await?;
                let jump_host = jump.config.host.clone();
                debug!("Opening tunnel to {}:{} via {}", host, port, jump_host);

                let channel = jump
                    .handle()?
                    .channel_open_direct_tcpip(host.as_str(), u32::from(port), "127.0.0.1", 0)
                    .await
                    .map_err(|source| TransportError::Tunnel {
                        jump_host,
                        host: host.clone(),
                        port,
                        source,
                    })?;

                tokio::time::timeout(
                    timeout,
                    client::connect_stream(ssh_config, channel.into_stream(), handler),
                )
                .await
            }
            None => {
                debug!("Opening new SSH connection to {}@{}:{}", self.config.username, host, port);
                tokio::time::timeout(
                    timeout,
                    client::connect(ssh_config, (host.as_str(), port), handler),
                )
                .await
            }
        };

        let mut handle = connected
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| {
                // check_server_key stores a detailed error in place of the
                // generic russh::Error::UnknownKey
                let stored = host_key_error.lock().ok().and_then(|mut slot| slot.take());
                match (stored, e) {
                    (Some(hk_err), _) => hk_err,
                    (None, russh::Error::IO(source)) => TransportError::ConnectionFailed {
                        host: host.clone(),
                        port,
                        source,
                    },
                    (None, e) => TransportError::Ssh(e),
                }
            })?;

        Self::authenticate(&mut handle, &self.config).await?;

        Ok(handle)
    }

    /// Authenticate with the server.
    async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
        let success = match &config.auth {
            AuthMethod::None => session
                .authenticate_none(&config.username)
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::Password(password) => session
                .authenticate_password(&config.username, password.expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_ref().map(|p| p.expose_secret()))
                    .map_err(|e| TransportError::Key(format!("{}: {}", path.display(), e)))?;

                // Get the best RSA hash algorithm supported by the server
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(TransportError::Ssh)?
                    .flatten();

                session
                    .authenticate_publickey(
                        &config.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(TransportError::Ssh)?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
            }
            .into());
        }

        Ok(())
    }

    fn handle(&self) -> Result<&Handle<SshHandler>> {
        self.handle
            .as_ref()
            .ok_or_else(|| TransportError::NotConnected.into())
    }

    /// Open the PTY shell unless one is already open.
    async fn open_shell(&mut self) -> Result<()> {
        if self.shell.is_some() {
            return Ok(());
        }

        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(ChannelError::Ssh)?;

        channel
            .request_pty(
                true,
                "xterm",
                self.config.terminal_width,
                self.config.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(ChannelError::Ssh)?;

        channel
            .request_shell(true)
            .await
            .map_err(|_| ChannelError::ShellOpenFailed)?;

        debug!("Interactive shell open on {}", self.config.host);
        self.shell = Some(ShellChannel::new(channel));
        self.at_prompt = false;
        Ok(())
    }

    /// Close the interactive shell and go back to the initial prompt.
    pub async fn close_channel(&mut self) {
        if let Some(shell) = self.shell.take() {
            if let Err(e) = shell.channel.close().await {
                debug!("Closing shell on {}: {}", self.config.host, e);
            }
            self.reset_prompt();
        }
        self.at_prompt = false;
    }

    fn drop_connection(&mut self) {
        self.shell = None;
        self.handle = None;
        self.at_prompt = false;
        self.state = SessionState::Disconnected;
    }

    async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        let mut channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(ChannelError::Ssh)?;
        channel.exec(true, command).await.map_err(ChannelError::Ssh)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        // Exit status may arrive after EOF, so read until close.
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    stderr.extend_from_slice(&data)
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                    exit_status = Some(status)
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }
}

#[async_trait]
impl Session for SshSession {
    async fn connect(&mut self) -> Result<()> {
        self.ensure_connected().await
    }

    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        self.ensure_connected().await?;
        debug!("SSH command: {}", command);

        let output = tokio::time::timeout(timeout, self.exec(command))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;

        trace!("SSH output:\n{}", output.stdout);
        Ok(output)
    }

    async fn run_interactive(
        &mut self,
        command: &str,
        timeout: Duration,
        callback: Option<&dyn RowCallback>,
        line_ending: Option<&str>,
    ) -> Result<String> {
        debug!("SSH interactive command: {}", command);
        self.wait_prompt(timeout).await?;

        let line = format!("{}{}", command, line_ending.unwrap_or(DEFAULT_LINE_ENDING));
        let poll_interval = self.config.poll_interval;
        let shell = self.shell.as_mut().ok_or(ChannelError::ShellOpenFailed)?;

        self.at_prompt = false;
        shell.send(line.as_bytes()).await?;

        let wait = PromptWaiter::new(&self.prompt)
            .timeout(timeout)
            .poll_interval(poll_interval)
            .min_input_length(command.len() + 1)
            .maybe_callback(callback)
            .wait(shell)
            .await?;

        self.at_prompt = wait.reached_prompt;
        debug!("Data for command {}:\n{}", command, wait.text);
        Ok(wait.text)
    }

    async fn upload(&mut self, data: &[u8], filename: &str) -> Result<()> {
        self.ensure_connected().await?;
        info!("Uploading {} bytes to {}:{}", data.len(), self.config.host, filename);

        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(ChannelError::Ssh)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(ChannelError::Ssh)?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ChannelError::Sftp(e.to_string()))?;

        let mut file = sftp
            .create(filename)
            .await
            .map_err(|e| ChannelError::Sftp(format!("{}: {}", filename, e)))?;
        file.write_all(data)
            .await
            .map_err(|e| ChannelError::Sftp(format!("{}: {}", filename, e)))?;
        file.shutdown()
            .await
            .map_err(|e| ChannelError::Sftp(format!("{}: {}", filename, e)))?;

        if let Err(e) = sftp.close().await {
            debug!("Closing SFTP session: {}", e);
        }
        Ok(())
    }

    async fn wait_prompt(&mut self, timeout: Duration) -> Result<()> {
        self.ensure_connected().await?;
        self.open_shell().await?;
        if self.at_prompt {
            return Ok(());
        }

        let poll_interval = self.config.poll_interval;
        let shell = self.shell.as_mut().ok_or(ChannelError::ShellOpenFailed)?;
        let wait = PromptWaiter::new(&self.prompt)
            .timeout(timeout)
            .poll_interval(poll_interval)
            .wait(shell)
            .await?;

        self.at_prompt = wait.reached_prompt;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.close_channel().await;

        if let Some(handle) = self.handle.take() {
            if !handle.is_closed() {
                if let Err(e) = handle
                    .disconnect(russh::Disconnect::ByApplication, "", "en")
                    .await
                {
                    warn!("Disconnecting from {}: {}", self.config.host, e);
                }
            }
        }
        self.drop_connection();

        if let Some(jump) = self.jump.as_mut() {
            jump.close().await?;
        }
        Ok(())
    }

    async fn reopen(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let policy = self.config.reconnect.clone();
        let host = self.config.host.clone();
        let port = self.config.port;
        let failed = || TransportError::ReconnectFailed {
            host: host.clone(),
            port,
            timeout,
        };

        // The target port is only reachable through the tunnel.
        if self.jump.is_none() && !wait_reachable(&host, port, deadline, &policy).await {
            return Err(failed().into());
        }

        loop {
            self.drop_connection();
            match self.open_connection().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if Instant::now() + policy.retry_interval >= deadline {
                        warn!("Giving up reconnecting to {}:{}: {}", host, port, e);
                        return Err(failed().into());
                    }
                    debug!("Reconnect to {}:{} failed: {}", host, port, e);
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

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Stores a detailed host-key error so connect() can surface it
    /// instead of the generic russh::Error::UnknownKey.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// Check the host key against known_hosts.
    ///
    /// Returns `Ok(true)` if matched, `Ok(false)` if host not found,
    /// `Err(TransportError::HostKeyChanged)` if key changed.
    fn check_known_hosts(
        &self,
        pubkey: &PublicKey,
    ) -> std::result::Result<bool, TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::check_known_hosts(&self.host, self.port, pubkey)
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => {
                Err(TransportError::HostKeyChanged {
                    host: self.host.clone(),
                    port: self.port,
                    line,
                })
            }
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    /// Save a new host key to known_hosts.
    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::known_hosts::learn_known_hosts_path(
                &self.host, self.port, pubkey, path,
            )
        } else {
            russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey)
        };

        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, error: TransportError) -> bool {
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(error);
        }
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    info!("Learning new host key for {}:{}", self.host, self.port);
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key: {}", e);
                    }
                    Ok(true)
                }
                Err(e) => Ok(self.reject(e)),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => Ok(self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                })),
                Err(e) => Ok(self.reject(e)),
            },
        }
    }
}
