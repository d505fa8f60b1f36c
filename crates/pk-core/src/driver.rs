//! Emulator-side loop.
//!
//! One [`EmulatorDriver::tick`] per emulated frame:
//!
//! 1. build and publish a snapshot
//! 2. consume one action command (holds the button for its frames)
//! 3. auto-advance text, if enabled and no action ran this frame
//! 4. consume one reset command
//! 5. consume one memory edit command
//! 6. run the evolution rules, if due
//! 7. advance one frame
//!
//! Nothing here stops the loop. Mailbox failures, malformed documents and
//! failed save-state loads are logged and the next frame runs as usual.

use tracing::{debug, info, trace, warn};

use crate::builder::SnapshotBuilder;
use crate::command::{
    ActionCommand, Command, CommandDefaults, CommandInbox, Delivery, MemoryEditCommand,
    ResetCommand,
};
use crate::config::BridgeConfig;
use crate::emulator::{Emulator, Joypad};
use crate::error::{ConfigError, MailboxError};
use crate::mailbox::{Mailbox, Mailboxes};
use crate::rules::{Evolution, RuleEngine, RuleScheduler};
use crate::snapshot::Snapshot;

/// Loop settings taken from `[emulator]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSettings {
    pub defaults: CommandDefaults,
    pub auto_advance: bool,
    pub auto_advance_frames: u32,
}

impl DriverSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            defaults: CommandDefaults {
                hold_frames: config.emulator.default_hold_frames,
                max_hold_frames: config.emulator.max_hold_frames,
            },
            auto_advance: config.emulator.auto_advance,
            auto_advance_frames: config.emulator.auto_advance_frames.max(1),
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Frame stamped on this tick's snapshot
    pub frame: u64,
    pub published: bool,
    pub action: Option<ActionCommand>,
    pub auto_advanced: bool,
    /// Reset that loaded successfully
    pub reset: Option<ResetCommand>,
    pub memory_edit: Option<MemoryEditCommand>,
    pub evolutions: Vec<Evolution>,
    /// Ids dropped as malformed, with their channel
    pub dropped: Vec<(&'static str, String)>,
    /// Errors logged and skipped during the tick
    pub errors: usize,
    /// Frames the emulator advanced during the tick
    pub frames_advanced: u64,
}

/// Drives an [`Emulator`] against the mailbox set
pub struct EmulatorDriver<E> {
    emulator: E,
    builder: SnapshotBuilder,
    rules: RuleEngine,
    scheduler: RuleScheduler,
    snapshot_box: Box<dyn Mailbox>,
    actions: CommandInbox<ActionCommand>,
    resets: CommandInbox<ResetCommand>,
    memory_edits: CommandInbox<MemoryEditCommand>,
    settings: DriverSettings,
    frame: u64,
    last_text_box: u8,
    publish_failing: bool,
    latest: Option<Snapshot>,
}

impl<E: Emulator> EmulatorDriver<E> {
    /// Resolve the layout and wire up the mailboxes. Fails only on a bad
    /// layout or config.
    pub fn new(emulator: E, config: &BridgeConfig, mailboxes: Mailboxes) -> Result<Self, ConfigError> {
        config.validate()?;
        let layout = config.layout()?;
        let Mailboxes {
            snapshot,
            action,
            reset,
            memory_edit,
        } = mailboxes;

        info!(
            snapshot = %snapshot.describe(),
            action = %action.describe(),
            rules = config.rules.len(),
            auto_advance = config.emulator.auto_advance,
            "emulator bridge starting"
        );

        Ok(Self {
            emulator,
            builder: SnapshotBuilder::new(layout.clone()),
            rules: RuleEngine::new(layout, config.rules.clone()),
            scheduler: RuleScheduler::new(config.emulator.rule_interval_frames),
            snapshot_box: snapshot,
            actions: CommandInbox::new(action),
            resets: CommandInbox::new(reset),
            memory_edits: CommandInbox::new(memory_edit),
            settings: DriverSettings::from_config(config),
            frame: 0,
            last_text_box: 0,
            publish_failing: false,
            latest: None,
        })
    }

    pub fn emulator(&self) -> &E {
        &self.emulator
    }

    pub fn emulator_mut(&mut self) -> &mut E {
        &mut self.emulator
    }

    pub fn into_emulator(self) -> E {
        self.emulator
    }

    /// Frames advanced since the driver started. Never rewinds.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Snapshot built on the most recent tick
    pub fn latest(&self) -> Option<&Snapshot> {
        self.latest.as_ref()
    }

    pub fn last_action_id(&self) -> Option<&str> {
        self.actions.ledger().last_consumed()
    }

    pub fn last_reset_id(&self) -> Option<&str> {
        self.resets.ledger().last_consumed()
    }

    pub fn last_memory_edit_id(&self) -> Option<&str> {
        self.memory_edits.ledger().last_consumed()
    }

    /// Run one frame of the loop.
    pub fn tick(&mut self) -> FrameReport {
        let start = self.frame;
        let mut report = FrameReport {
            frame: start,
            ..FrameReport::default()
        };

        let snapshot = self.builder.build(&self.emulator, self.frame);
        report.published = self.publish(&snapshot, &mut report);
        let text_box = snapshot.text_box_id;
        self.latest = Some(snapshot);

        self.consume_action(&mut report);
        if report.action.is_none() && self.settings.auto_advance {
            self.auto_advance(text_box, &mut report);
        }
        self.consume_reset(&mut report);
        self.consume_memory_edit(&mut report);

        if self.scheduler.is_due(self.frame) {
            report.evolutions = self.rules.apply(&mut self.emulator);
            self.scheduler.mark_ran(self.frame);
            for evo in &report.evolutions {
                info!(slot = evo.slot, from = evo.from, to = evo.to, level = evo.level, "forced evolution");
            }
        }

        self.step();
        report.frames_advanced = self.frame - start;
        trace!(frame = report.frame, advanced = report.frames_advanced, "tick");
        report
    }

    /// Tick `ticks` times. Returns the number of frames advanced.
    pub fn run_for(&mut self, ticks: u64) -> u64 {
        let start = self.frame;
        for _ in 0..ticks {
            self.tick();
        }
        self.frame - start
    }

    /// Tick until `stop` returns true for a report. Returns the tick count.
    pub fn run_until<F>(&mut self, mut stop: F) -> u64
    where
        F: FnMut(&FrameReport) -> bool,
    {
        let mut ticks = 0;
        loop {
            let report = self.tick();
            ticks += 1;
            if stop(&report) {
                return ticks;
            }
        }
    }

    fn step(&mut self) {
        self.emulator.advance_frame();
        self.frame += 1;
    }

    /// Hold `buttons` for exactly `frames` frames, then release.
    fn hold(&mut self, buttons: Joypad, frames: u32) {
        self.emulator.set_joypad(buttons);
        for _ in 0..frames {
            self.step();
        }
        self.emulator.set_joypad(Joypad::empty());
    }

    fn publish(&mut self, snapshot: &Snapshot, report: &mut FrameReport) -> bool {
        let result = snapshot
            .to_document()
            .map_err(MailboxError::from)
            .and_then(|body| self.snapshot_box.write(&body));
        match result {
            Ok(()) => {
                if self.publish_failing {
                    info!(frame = snapshot.frame, "snapshot publishing recovered");
                    self.publish_failing = false;
                }
                true
            }
            Err(e) => {
                // Once per outage, not once per frame
                if !self.publish_failing {
                    warn!(frame = snapshot.frame, error = %e, "failed to publish snapshot");
                    self.publish_failing = true;
                }
                report.errors += 1;
                false
            }
        }
    }

    fn consume_action(&mut self, report: &mut FrameReport) {
        let Some(cmd) = poll(&mut self.actions, &self.settings.defaults, report) else {
            return;
        };
        info!(id = %cmd.id, button = %cmd.button, frames = cmd.frames, frame = self.frame, "action");
        self.hold(Joypad::from(cmd.button), cmd.frames);
        finish(&mut self.actions, &cmd, report);
        report.action = Some(cmd);
    }

    /// Press A once per newly opened text box. Only called on frames with
    /// no explicit action, so the edge is tracked across eligible frames.
    fn auto_advance(&mut self, text_box: u8, report: &mut FrameReport) {
        let previous = std::mem::replace(&mut self.last_text_box, text_box);
        if text_box == 0 || text_box == previous {
            return;
        }
        debug!(text_box, frame = self.frame, "auto-advancing text box");
        self.hold(Joypad::A, self.settings.auto_advance_frames);
        report.auto_advanced = true;
    }

    fn consume_reset(&mut self, report: &mut FrameReport) {
        let Some(cmd) = poll(&mut self.resets, &self.settings.defaults, report) else {
            return;
        };
        match self.emulator.load_state(cmd.slot) {
            Ok(()) => {
                info!(id = %cmd.id, slot = cmd.slot, frame = self.frame, "loaded save state");
                report.reset = Some(cmd.clone());
            }
            Err(e) => {
                warn!(id = %cmd.id, slot = cmd.slot, error = %e, "save state load failed");
                report.errors += 1;
            }
        }
        // At most once, even when the load failed
        finish(&mut self.resets, &cmd, report);
    }

    fn consume_memory_edit(&mut self, report: &mut FrameReport) {
        let Some(cmd) = poll(&mut self.memory_edits, &self.settings.defaults, report) else {
            return;
        };
        match self.rules.set_starter(&mut self.emulator, cmd.species, cmd.level) {
            Some(previous) => {
                info!(
                    id = %cmd.id,
                    previous,
                    species = cmd.species,
                    level = cmd.level,
                    "starter overwritten"
                );
                report.memory_edit = Some(cmd.clone());
            }
            None => {
                warn!(id = %cmd.id, "no party to edit; memory edit dropped");
                report.dropped.push((MemoryEditCommand::CHANNEL, cmd.id.clone()));
            }
        }
        finish(&mut self.memory_edits, &cmd, report);
    }
}

/// Poll a channel, folding everything but a new command into the report.
fn poll<T: Command>(
    inbox: &mut CommandInbox<T>,
    defaults: &CommandDefaults,
    report: &mut FrameReport,
) -> Option<T> {
    match inbox.take(defaults) {
        Ok(Delivery::Deliver(cmd)) => Some(cmd),
        Ok(Delivery::Dropped { id, .. }) => {
            report.dropped.push((T::CHANNEL, id));
            None
        }
        Ok(Delivery::Idle | Delivery::Unreadable | Delivery::Duplicate(_)) => None,
        Err(e) => {
            warn!(channel = T::CHANNEL, error = %e, "failed to read command mailbox");
            report.errors += 1;
            None
        }
    }
}

fn finish<T: Command>(inbox: &mut CommandInbox<T>, cmd: &T, report: &mut FrameReport) {
    if let Err(e) = inbox.acknowledge(cmd.id()) {
        warn!(channel = T::CHANNEL, id = cmd.id(), error = %e, "failed to clear command mailbox");
        report.errors += 1;
    }
}
