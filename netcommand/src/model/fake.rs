//! Scripted session for model tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::{RowCallback, RowOutcome};
use crate::error::{ChannelError, Result, TransportError};
use crate::transport::{CommandOutput, Session, SessionState};

/// Canned device reaction to one command.
#[derive(Debug, Clone)]
pub(crate) enum Reaction {
    /// Rows shown to the callback, then the response body.
    Output { questions: Vec<String>, body: String },
    /// The device goes quiet (reload).
    Timeout,
}

/// Session that answers from a script keyed by command.
///
/// Each command has a queue of reactions; the last one repeats.
#[derive(Debug)]
pub(crate) struct FakeSession {
    script: HashMap<String, VecDeque<Reaction>>,
    pub commands: Vec<String>,
    pub replies: Vec<String>,
    pub uploads: Vec<(String, Vec<u8>)>,
    pub disconnects: usize,
    pub prompts: Vec<String>,
    prompt: String,
    at_prompt: bool,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            script: HashMap::new(),
            commands: Vec::new(),
            replies: Vec::new(),
            uploads: Vec::new(),
            disconnects: 0,
            prompts: Vec::new(),
            prompt: ">".to_string(),
            at_prompt: true,
        }
    }

    pub fn on(mut self, command: &str, body: &str) -> Self {
        self.push(command, Reaction::Output {
            questions: Vec::new(),
            body: body.to_string(),
        });
        self
    }

    pub fn on_asking(mut self, command: &str, questions: &[&str], body: &str) -> Self {
        self.push(command, Reaction::Output {
            questions: questions.iter().map(|q| q.to_string()).collect(),
            body: body.to_string(),
        });
        self
    }

    pub fn on_timeout(mut self, command: &str) -> Self {
        self.push(command, Reaction::Timeout);
        self
    }

    fn push(&mut self, command: &str, reaction: Reaction) {
        self.script.entry(command.to_string()).or_default().push_back(reaction);
    }

    fn react(&mut self, command: &str) -> Result<Reaction> {
        self.commands.push(command.to_string());
        let queue = self
            .script
            .get_mut(command)
            .ok_or_else(|| crate::error::CommandError::failed(format!("unscripted: {}", command)))?;
        let reaction = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        reaction.ok_or_else(|| crate::error::CommandError::failed("empty script").into())
    }

    /// Commands sent, excluding read-only `show`/`print` queries.
    pub fn mutating_commands(&self) -> Vec<&str> {
        self.commands
            .iter()
            .map(String::as_str)
            .filter(|c| !c.starts_with("show ") && !c.ends_with(" print") && *c != "enable")
            .collect()
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        match self.react(command)? {
            Reaction::Output { body, .. } => Ok(CommandOutput {
                stdout: body,
                stderr: String::new(),
                exit_status: Some(0),
            }),
            Reaction::Timeout => Err(TransportError::Timeout(timeout).into()),
        }
    }

    async fn run_interactive(
        &mut self,
        command: &str,
        timeout: Duration,
        callback: Option<&dyn RowCallback>,
        _line_ending: Option<&str>,
    ) -> Result<String> {
        self.prompts.push(self.prompt.clone());
        match self.react(command)? {
            Reaction::Output { questions, body } => {
                for question in &questions {
                    match callback.map(|cb| cb.classify(question)) {
                        Some(RowOutcome::Reply(reply)) => self.replies.push(reply),
                        Some(RowOutcome::Stop) => {
                            self.at_prompt = false;
                            return Ok(question.clone());
                        }
                        _ => {}
                    }
                }
                self.at_prompt = true;
                Ok(body)
            }
            Reaction::Timeout => {
                self.at_prompt = false;
                Err(ChannelError::PromptTimeout(timeout).into())
            }
        }
    }

    async fn upload(&mut self, data: &[u8], filename: &str) -> Result<()> {
        self.uploads.push((filename.to_string(), data.to_vec()));
        Ok(())
    }

    async fn wait_prompt(&mut self, _timeout: Duration) -> Result<()> {
        self.at_prompt = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn reopen(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn expect_disconnect(&mut self, _timeout: Duration) -> Result<()> {
        self.disconnects += 1;
        self.prompt = ">".to_string();
        self.at_prompt = true;
        Ok(())
    }

    fn prompt(&self) -> &str {
        &self.prompt
    }

    fn set_prompt(&mut self, prompt: &str) {
        self.prompt = prompt.to_string();
    }

    fn reset_prompt(&mut self) {
        self.prompt = ">".to_string();
    }

    fn is_at_prompt(&self) -> bool {
        self.at_prompt
    }

    fn state(&self) -> SessionState {
        SessionState::Connected
    }

    fn address(&self) -> &str {
        "192.0.2.1"
    }
}
