//! Agent-side loop: read, check staleness, decide, submit, wait.

use std::thread;
use std::time::Duration;

use pk_core::config::AgentConfig;
use tracing::{debug, warn};

use crate::client::{BridgeClient, ResetWait};
use crate::error::AgentError;
use crate::policy::{Decision, Policy};
use crate::stale::{Freshness, StaleDetector};

/// What one step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Frame of the snapshot the decision was based on
    pub frame: Option<u64>,
    pub freshness: Freshness,
    pub decision: Decision,
    /// Id of the command written this step
    pub submitted: Option<String>,
}

/// Running totals for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub steps: u64,
    pub presses: u64,
    pub resets: u64,
    pub failed_resets: u64,
    /// Commands that could not be written to their mailbox
    pub failed_submits: u64,
    pub stalled_steps: u64,
}

pub struct AgentLoop<P> {
    client: BridgeClient,
    policy: P,
    detector: StaleDetector,
    interval: Duration,
    reset_wait: ResetWait,
    stats: LoopStats,
}

impl<P: Policy> AgentLoop<P> {
    pub fn new(client: BridgeClient, policy: P, config: &AgentConfig) -> Self {
        Self {
            client,
            policy,
            detector: StaleDetector::new(Duration::from_millis(config.stale_after_ms)),
            interval: Duration::from_millis(config.decision_interval_ms),
            reset_wait: ResetWait::default(),
            stats: LoopStats::default(),
        }
    }

    pub fn with_reset_wait(mut self, wait: ResetWait) -> Self {
        self.reset_wait = wait;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn client(&self) -> &BridgeClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut BridgeClient {
        &mut self.client
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// One decision step. Never blocks except while waiting out a reset.
    pub fn step(&mut self) -> Result<StepReport, AgentError> {
        self.stats.steps += 1;
        let Some(snapshot) = self.client.latest_snapshot() else {
            return Ok(StepReport {
                frame: None,
                freshness: Freshness::Waiting,
                decision: Decision::Wait,
                submitted: None,
            });
        };

        let freshness = self.detector.observe_now(snapshot.frame);
        if freshness.is_stalled() {
            // Nothing would consume a command right now
            self.stats.stalled_steps += 1;
            return Ok(StepReport {
                frame: Some(snapshot.frame),
                freshness,
                decision: Decision::Wait,
                submitted: None,
            });
        }

        let decision = self.policy.decide(&snapshot);
        let slot = self.client.save_slot();
        let submitted = match decision {
            Decision::Press { button, frames } => {
                let frames = frames.unwrap_or(self.client.frames_per_action());
                match self.client.press_for(button, frames) {
                    Ok(id) => {
                        self.stats.presses += 1;
                        Some(id)
                    }
                    Err(AgentError::Mailbox(e)) => {
                        // The next step submits again
                        warn!(%button, error = %e, "failed to submit action");
                        self.stats.failed_submits += 1;
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
            Decision::Reset => match self.client.reset_and_wait(slot, &self.reset_wait) {
                Ok(_) => {
                    self.stats.resets += 1;
                    self.detector.reset();
                    self.policy.on_reset();
                    None
                }
                Err(AgentError::ResetNotObserved { slot, attempts }) => {
                    warn!(slot, attempts, "reset not observed; continuing");
                    self.stats.failed_resets += 1;
                    None
                }
                Err(AgentError::Mailbox(e)) => {
                    warn!(slot, error = %e, "failed to submit reset");
                    self.stats.failed_submits += 1;
                    None
                }
                Err(e) => return Err(e),
            },
            Decision::Wait => None,
        };

        debug!(frame = snapshot.frame, ?decision, "agent step");
        Ok(StepReport {
            frame: Some(snapshot.frame),
            freshness,
            decision,
            submitted,
        })
    }

    /// Step `steps` times, pausing the configured interval between steps.
    pub fn run(&mut self, steps: u64) -> Result<LoopStats, AgentError> {
        for n in 0..steps {
            self.step()?;
            if n + 1 < steps {
                thread::sleep(self.interval);
            }
        }
        Ok(self.stats)
    }
}
