//! Channel layer: prompt detection and interactive prompt answering.
//!
//! This module is transport independent. Sessions implement [`PromptIo`]
//! over their shell channel or socket and let [`PromptWaiter`] decide when
//! the device is back at its prompt.

mod buffer;
mod rows;
mod wait;

pub use buffer::{LineBuffer, Row};
pub use rows::{Answer, AnswerTable, RowCallback, RowMatcher, RowOutcome, login_dialog};
pub use wait::{
    DEFAULT_POLL_INTERVAL, DEFAULT_READ_SIZE, PromptIo, PromptWait, PromptWaiter, wait_for_prompt,
};

#[cfg(test)]
pub(crate) use wait::tests::ScriptedIo;
