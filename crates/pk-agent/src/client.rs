//! Agent end of the mailbox protocol.
//!
//! The client writes command documents with fresh ids and reads the latest
//! snapshot. Reads never fail: a missing, torn or implausible snapshot
//! yields the last good one instead.

use std::thread;
use std::time::Duration;

use pk_core::config::AgentConfig;
use pk_core::{
    ActionCommand, Button, Command, Mailbox, Mailboxes, MemoryEditCommand, ResetCommand, Snapshot,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AgentError;

/// Fresh command id
pub fn new_command_id() -> String {
    Uuid::new_v4().to_string()
}

/// How [`BridgeClient::reset_and_wait`] paces itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetWait {
    /// Reset submissions before giving up
    pub attempts: u32,
    /// Pause after each submission before polling
    pub settle: Duration,
    /// Snapshot polls per attempt
    pub polls: u32,
    pub poll_interval: Duration,
}

impl Default for ResetWait {
    fn default() -> Self {
        Self {
            attempts: 3,
            settle: Duration::from_millis(1500),
            polls: 50,
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Writes commands and reads snapshots
pub struct BridgeClient {
    snapshot: Box<dyn Mailbox>,
    action: Box<dyn Mailbox>,
    reset: Box<dyn Mailbox>,
    memory_edit: Box<dyn Mailbox>,
    frames_per_action: u32,
    save_slot: u8,
    last_good: Option<Snapshot>,
}

impl BridgeClient {
    pub fn new(mailboxes: Mailboxes, config: &AgentConfig) -> Self {
        Self {
            snapshot: mailboxes.snapshot,
            action: mailboxes.action,
            reset: mailboxes.reset,
            memory_edit: mailboxes.memory_edit,
            frames_per_action: config.frames_per_action,
            save_slot: config.save_slot,
            last_good: None,
        }
    }

    pub fn frames_per_action(&self) -> u32 {
        self.frames_per_action
    }

    pub fn save_slot(&self) -> u8 {
        self.save_slot
    }

    /// Last snapshot that parsed and passed the plausibility check
    pub fn last_good(&self) -> Option<&Snapshot> {
        self.last_good.as_ref()
    }

    /// Read the snapshot mailbox, falling back to the last good snapshot.
    pub fn latest_snapshot(&mut self) -> Option<Snapshot> {
        match self.read_snapshot() {
            Some(snapshot) if snapshot.is_plausible() => {
                self.last_good = Some(snapshot);
            }
            Some(snapshot) => {
                debug!(frame = snapshot.frame, party_count = snapshot.party_count, "ignoring implausible snapshot");
            }
            None => {}
        }
        self.last_good.clone()
    }

    fn read_snapshot(&self) -> Option<Snapshot> {
        let body = match self.snapshot.read() {
            Ok(Some(body)) => body,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "snapshot mailbox unreadable");
                return None;
            }
        };
        match Snapshot::from_document(&body) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                // Usually a read racing a non-atomic writer
                debug!(error = %e, "snapshot document did not parse");
                None
            }
        }
    }

    fn submit<T: Command>(mailbox: &dyn Mailbox, command: &T) -> Result<(), AgentError> {
        mailbox.write(&command.to_document()?)?;
        debug!(channel = T::CHANNEL, id = command.id(), "command submitted");
        Ok(())
    }

    /// Press `button` for the configured number of frames. Returns the id.
    pub fn press(&self, button: Button) -> Result<String, AgentError> {
        self.press_for(button, self.frames_per_action)
    }

    pub fn press_for(&self, button: Button, frames: u32) -> Result<String, AgentError> {
        let command = ActionCommand::new(new_command_id(), button, frames);
        Self::submit(self.action.as_ref(), &command)?;
        Ok(command.id)
    }

    /// Ask the emulator to load save state `slot`. Returns the id.
    pub fn request_reset(&self, slot: u8) -> Result<String, AgentError> {
        let command = ResetCommand::load_state(new_command_id(), slot);
        Self::submit(self.reset.as_ref(), &command)?;
        Ok(command.id)
    }

    pub fn set_starter(&self, species: u8, level: u8) -> Result<String, AgentError> {
        let command = MemoryEditCommand::set_starter(new_command_id(), species, level);
        Self::submit(self.memory_edit.as_ref(), &command)?;
        Ok(command.id)
    }

    /// Load save state `slot` and wait until the game looks like a fresh
    /// start, resubmitting the reset a few times if it does not.
    pub fn reset_and_wait(&mut self, slot: u8, wait: &ResetWait) -> Result<Snapshot, AgentError> {
        for attempt in 1..=wait.attempts {
            let before = self.read_snapshot().map(|s| s.frame);
            self.last_good = None;
            self.request_reset(slot)?;
            info!(slot, attempt, attempts = wait.attempts, "reset requested");
            thread::sleep(wait.settle);

            for check in 0..wait.polls {
                let current = self.read_snapshot();
                if let Some(snapshot) = current {
                    let advanced = before.is_none_or(|frame| snapshot.frame > frame);
                    if advanced && snapshot.is_plausible() && snapshot.looks_like_fresh_game() {
                        info!(
                            party_count = snapshot.party_count,
                            badges = snapshot.badges,
                            pokedex = snapshot.pokedex_owned,
                            "fresh game ready"
                        );
                        self.last_good = Some(snapshot.clone());
                        return Ok(snapshot);
                    }
                    if check % 10 == 0 {
                        debug!(
                            party_count = snapshot.party_count,
                            badges = snapshot.badges,
                            pokedex = snapshot.pokedex_owned,
                            "waiting for fresh game"
                        );
                    }
                }
                thread::sleep(wait.poll_interval);
            }
        }
        warn!(slot, "save state never produced a fresh game");
        Err(AgentError::ResetNotObserved {
            slot,
            attempts: wait.attempts,
        })
    }
}
