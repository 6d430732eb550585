//! Prompt-wait engine.
//!
//! Transport independent: a session hands the engine something that can
//! send and poll bytes ([`PromptIo`]), the prompt to look for, and optionally a
//! [`RowCallback`]. The engine polls until the output ends with the prompt,
//! the callback says stop, or nothing arrives for the idle timeout.

use std::future::Future;
use std::time::Duration;

use log::{debug, trace};

use super::buffer::LineBuffer;
use super::rows::{RowCallback, RowOutcome};
use crate::error::{ChannelError, Result};

/// Default delay between empty polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default maximum bytes read per poll.
pub const DEFAULT_READ_SIZE: usize = 8192;

/// Byte primitives the engine drives.
pub trait PromptIo: Send {
    /// Write bytes to the remote shell.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Return up to `max` bytes that are already available.
    ///
    /// Must not block waiting for data: an empty vector means nothing is
    /// available right now. A closed stream is an error.
    fn receive(&mut self, max: usize) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Outcome of a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptWait {
    /// Response body if the prompt was reached, otherwise everything received.
    pub text: String,

    /// Whether the output ended with the prompt.
    pub reached_prompt: bool,
}

/// Configured prompt wait.
///
/// # Example
///
/// ```rust,no_run
/// # use std::time::Duration;
/// # use netcommand::channel::{AnswerTable, PromptIo, PromptWaiter};
/// # async fn example(io: &mut impl PromptIo) -> netcommand::error::Result<()> {
/// let answers = AnswerTable::new().reply("[confirm]", "");
/// let wait = PromptWaiter::new("#")
///     .timeout(Duration::from_secs(30))
///     .min_input_length("reload".len() + 1)
///     .callback(&answers)
///     .wait(io)
///     .await?;
/// println!("{}", wait.text);
/// # Ok(())
/// # }
/// ```
pub struct PromptWaiter<'a> {
    prompt: &'a str,
    timeout: Duration,
    min_input_length: usize,
    poll_interval: Duration,
    read_size: usize,
    callback: Option<&'a dyn RowCallback>,
}

impl<'a> PromptWaiter<'a> {
    /// Wait for `prompt` with default settings.
    pub fn new(prompt: &'a str) -> Self {
        Self {
            prompt,
            timeout: Duration::from_secs(5),
            min_input_length: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_size: DEFAULT_READ_SIZE,
            callback: None,
        }
    }

    /// Idle timeout: how long the device may stay silent.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bytes that must accumulate before prompt or row matching starts.
    ///
    /// Usually the length of the echoed command plus one.
    pub fn min_input_length(mut self, len: usize) -> Self {
        self.min_input_length = len;
        self
    }

    /// Delay between empty polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Maximum bytes requested per poll.
    pub fn read_size(mut self, size: usize) -> Self {
        self.read_size = size.max(1);
        self
    }

    /// Row classifier for intermediate prompts.
    pub fn callback(mut self, callback: &'a dyn RowCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Optional row classifier.
    pub fn maybe_callback(mut self, callback: Option<&'a dyn RowCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Number of consecutive empty polls tolerated before timing out.
    pub fn idle_budget(&self) -> u64 {
        let poll = self.poll_interval.as_nanos().max(1);
        self.timeout.as_nanos().div_ceil(poll) as u64
    }

    /// Run the wait loop.
    pub async fn wait<I: PromptIo>(&self, io: &mut I) -> Result<PromptWait> {
        let budget = self.idle_budget();
        let mut idle_polls: u64 = 0;
        let mut buffer = LineBuffer::new();

        debug!("Waiting for prompt {:?}", self.prompt);

        loop {
            let data = io.receive(self.read_size).await?;

            if data.is_empty() {
                idle_polls += 1;
                if idle_polls > budget {
                    debug!(
                        "No prompt after {:?} idle, received so far: {:?}",
                        self.timeout,
                        buffer.as_str_lossy()
                    );
                    return Err(ChannelError::PromptTimeout(self.timeout).into());
                }
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            idle_polls = 0;
            buffer.extend(&data);
            trace!("Data received: {:?}", String::from_utf8_lossy(&data));

            if buffer.len() <= self.min_input_length {
                continue;
            }

            if buffer.ends_with_prompt(self.prompt) {
                return Ok(PromptWait {
                    text: buffer.body(self.min_input_length),
                    reached_prompt: true,
                });
            }

            let Some(callback) = self.callback else {
                continue;
            };

            for row in buffer.rows() {
                if row.text.is_empty() {
                    if row.complete {
                        buffer.consume_to(row.end);
                    }
                    continue;
                }

                match callback.classify(&row.text) {
                    RowOutcome::NoAction => {
                        // An unterminated fragment is re-read once more bytes arrive.
                        if row.complete {
                            buffer.consume_to(row.end);
                        }
                    }
                    RowOutcome::Reply(reply) => {
                        debug!("Answering row {:?}", row.text);
                        let mut reply = reply.into_bytes();
                        if !reply.ends_with(b"\n") {
                            reply.push(b'\n');
                        }
                        io.send(&reply).await?;
                        buffer.consume_to(row.end);
                    }
                    RowOutcome::Stop => {
                        debug!("Row {:?} stopped the wait", row.text);
                        return Ok(PromptWait {
                            text: buffer.as_str_lossy().into_owned(),
                            reached_prompt: false,
                        });
                    }
                }
            }
        }
    }
}

/// Wait for `prompt` on `io`.
///
/// Function form of [`PromptWaiter`] with the default poll interval.
pub async fn wait_for_prompt<I: PromptIo>(
    io: &mut I,
    prompt: &str,
    timeout: Duration,
    callback: Option<&dyn RowCallback>,
    min_input_length: usize,
) -> Result<PromptWait> {
    PromptWaiter::new(prompt)
        .timeout(timeout)
        .maybe_callback(callback)
        .min_input_length(min_input_length)
        .wait(io)
        .await
}
