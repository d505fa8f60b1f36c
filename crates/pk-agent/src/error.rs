//! Agent-side errors.
//!
//! A missing, empty or torn snapshot is never an error on this side; the
//! client falls back to the last good snapshot instead.

use pk_core::MailboxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error("failed to encode command: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("save state slot {slot} did not produce a fresh game after {attempts} attempts")]
    ResetNotObserved { slot: u8, attempts: u32 },
}
