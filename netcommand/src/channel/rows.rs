//! Row classification for interactive prompts.
//!
//! While a command runs, every line the device prints is passed to a
//! [`RowCallback`]. The callback can ignore the line, type a reply (an enable
//! password, a `y` to a confirmation), or stop waiting for the prompt.
//!
//! Most callers build the callback from an [`AnswerTable`]:
//!
//! ```rust
//! use netcommand::channel::{AnswerTable, RowCallback, RowOutcome};
//!
//! let answers = AnswerTable::new()
//!     .reply("Are you sure you want to save?", "y")
//!     .stop("% Authentication failed");
//!
//! assert_eq!(
//!     answers.classify("Are you sure you want to save? (y/n)"),
//!     RowOutcome::Reply("y".to_string())
//! );
//! assert_eq!(answers.classify("Configuration Saved!"), RowOutcome::NoAction);
//! ```

use std::fmt;

/// What the prompt engine should do after seeing a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// Keep waiting.
    NoAction,

    /// Send this text (newline appended if missing) and keep waiting.
    Reply(String),

    /// Stop waiting without having reached the prompt.
    Stop,
}

/// Classifies one line of device output.
pub trait RowCallback: Send + Sync {
    /// Decide what to do about `row`.
    fn classify(&self, row: &str) -> RowOutcome;
}

impl<F> RowCallback for F
where
    F: Fn(&str) -> RowOutcome + Send + Sync,
{
    fn classify(&self, row: &str) -> RowOutcome {
        self(row)
    }
}

/// How a table entry matches a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowMatcher {
    /// Row contains the text anywhere.
    Contains(String),

    /// Row starts with the text.
    StartsWith(String),

    /// Row ends with the text.
    EndsWith(String),
}

impl RowMatcher {
    /// Check the matcher against a row.
    pub fn matches(&self, row: &str) -> bool {
        match self {
            RowMatcher::Contains(text) => row.contains(text.as_str()),
            RowMatcher::StartsWith(text) => row.starts_with(text.as_str()),
            RowMatcher::EndsWith(text) => row.ends_with(text.as_str()),
        }
    }
}

/// Answer attached to a table entry.
#[derive(Clone, PartialEq, Eq)]
pub enum Answer {
    /// Type this text.
    Reply(String),

    /// Stop waiting.
    Break,
}

impl fmt::Debug for Answer {
    // Replies are usually passwords.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Reply(_) => f.write_str("Reply(<hidden>)"),
            Answer::Break => f.write_str("Break"),
        }
    }
}

impl From<Option<String>> for Answer {
    /// `Some(text)` replies with `text`, `None` breaks out.
    fn from(value: Option<String>) -> Self {
        match value {
            Some(text) => Answer::Reply(text),
            None => Answer::Break,
        }
    }
}

/// Ordered list of `(matcher, answer)` pairs. The first matching entry wins.
#[derive(Debug, Clone, Default)]
pub struct AnswerTable {
    entries: Vec<(RowMatcher, Answer)>,
}

impl AnswerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    pub fn with_entry(mut self, matcher: RowMatcher, answer: Answer) -> Self {
        self.entries.push((matcher, answer));
        self
    }

    /// Reply with `answer` to rows containing `needle`.
    pub fn reply(self, needle: impl Into<String>, answer: impl Into<String>) -> Self {
        self.with_entry(RowMatcher::Contains(needle.into()), Answer::Reply(answer.into()))
    }

    /// Stop waiting on rows containing `needle`.
    pub fn stop(self, needle: impl Into<String>) -> Self {
        self.with_entry(RowMatcher::Contains(needle.into()), Answer::Break)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RowCallback for AnswerTable {
    fn classify(&self, row: &str) -> RowOutcome {
        self.entries
            .iter()
            .find(|(matcher, _)| matcher.matches(row))
            .map(|(_, answer)| match answer {
                Answer::Reply(text) => RowOutcome::Reply(text.clone()),
                Answer::Break => RowOutcome::Stop,
            })
            .unwrap_or(RowOutcome::NoAction)
    }
}

/// Login dialog for devices that authenticate inside the shell (Telnet).
///
/// Answers `Username:` and `Password:` prompts and gives up on
/// `% Authentication failed`.
pub fn login_dialog(username: &str, password: &str) -> AnswerTable {
    AnswerTable::new()
        .with_entry(
            RowMatcher::EndsWith("Username:".to_string()),
            Answer::Reply(format!("{}\n", username)),
        )
        .with_entry(
            RowMatcher::EndsWith("Password:".to_string()),
            Answer::Reply(format!("{}\n", password)),
        )
        .with_entry(
            RowMatcher::StartsWith("% Authentication failed".to_string()),
            Answer::Break,
        )
}
