//! Transport sessions: SSH (direct or through a jump host) and Telnet.
//!
//! Every session owns its physical channel, tracks whether the remote shell
//! is sitting at its prompt, and feeds the prompt-wait engine from
//! [`crate::channel`]. Sessions are not internally synchronised: all
//! operations take `&mut self`, so one command is in flight at a time.

mod builder;
pub mod config;
pub mod reachability;
mod ssh;
mod telnet;

pub use builder::{SessionBuilder, TransportKind};
pub use config::{AuthMethod, HostKeyVerification, ReconnectPolicy, SshConfig, TelnetConfig};
pub use ssh::{SshSession, clear_agent_socket};
pub use telnet::TelnetSession;

use std::time::Duration;

use async_trait::async_trait;

use crate::channel::RowCallback;
use crate::error::Result;

/// Line ending appended to interactive commands unless overridden.
pub const DEFAULT_LINE_ENDING: &str = "\r\n";

/// How long a rebooting device may take to accept connections again.
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(900);

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection; the next operation connects.
    Disconnected,

    /// Handshake in progress.
    Connecting,

    /// Connected and authenticated.
    Connected,
}

/// Output of a one-shot command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,

    /// Standard error (always empty on Telnet).
    pub stderr: String,

    /// Exit status, when the transport reports one.
    pub exit_status: Option<u32>,
}

/// A connection to one device.
#[async_trait]
pub trait Session: Send {
    /// Establish the connection if it is not already up.
    async fn connect(&mut self) -> Result<()>;

    /// Run a one-shot command and return its raw output.
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput>;

    /// Type `command` into the interactive shell and wait for the prompt.
    ///
    /// `callback` answers intermediate prompts. `line_ending` defaults to
    /// [`DEFAULT_LINE_ENDING`]. Returns the response body with the echoed
    /// command and trailing prompt removed, or the raw output if the callback
    /// stopped the wait.
    async fn run_interactive(
        &mut self,
        command: &str,
        timeout: Duration,
        callback: Option<&dyn RowCallback>,
        line_ending: Option<&str>,
    ) -> Result<String>;

    /// Store `data` as `filename` on the device.
    async fn upload(&mut self, data: &[u8], filename: &str) -> Result<()>;

    /// Block until the shell shows its prompt, unless already known to.
    async fn wait_prompt(&mut self, timeout: Duration) -> Result<()>;

    /// Close the connection (and any tunnel it owns).
    async fn close(&mut self) -> Result<()>;

    /// Wait for the device to be reachable and connect again.
    async fn reopen(&mut self, timeout: Duration) -> Result<()>;

    /// Drop the connection after a reboot-triggering command and reconnect.
    async fn expect_disconnect(&mut self, timeout: Duration) -> Result<()>;

    /// Prompt currently expected.
    fn prompt(&self) -> &str;

    /// Expect a different prompt, e.g. `#` after `enable`.
    fn set_prompt(&mut self, prompt: &str);

    /// Go back to the configured prompt.
    fn reset_prompt(&mut self);

    /// Whether the shell is known to be waiting at its prompt.
    fn is_at_prompt(&self) -> bool;

    /// Current connection state.
    fn state(&self) -> SessionState;

    /// Address of the device.
    fn address(&self) -> &str;
}

#[async_trait]
impl<S: Session + ?Sized> Session for Box<S> {
    async fn connect(&mut self) -> Result<()> {
        (**self).connect().await
    }

    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        (**self).run(command, timeout).await
    }

    async fn run_interactive(
        &mut self,
        command: &str,
        timeout: Duration,
        callback: Option<&dyn RowCallback>,
        line_ending: Option<&str>,
    ) -> Result<String> {
        (**self).run_interactive(command, timeout, callback, line_ending).await
    }

    async fn upload(&mut self, data: &[u8], filename: &str) -> Result<()> {
        (**self).upload(data, filename).await
    }

    async fn wait_prompt(&mut self, timeout: Duration) -> Result<()> {
        (**self).wait_prompt(timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }

    async fn reopen(&mut self, timeout: Duration) -> Result<()> {
        (**self).reopen(timeout).await
    }

    async fn expect_disconnect(&mut self, timeout: Duration) -> Result<()> {
        (**self).expect_disconnect(timeout).await
    }

    fn prompt(&self) -> &str {
        (**self).prompt()
    }

    fn set_prompt(&mut self, prompt: &str) {
        (**self).set_prompt(prompt)
    }

    fn reset_prompt(&mut self) {
        (**self).reset_prompt()
    }

    fn is_at_prompt(&self) -> bool {
        (**self).is_at_prompt()
    }

    fn state(&self) -> SessionState {
        (**self).state()
    }

    fn address(&self) -> &str {
        (**self).address()
    }
}
