//! Command documents and at-most-once delivery.
//!
//! Each channel (action, reset, memory edit) is one mailbox holding at most
//! one JSON document. A document is executed only if its `id` differs from
//! the last id consumed on that channel; after execution the document is
//! cleared and the id recorded. Channels keep independent id namespaces.
//! Memory edits may leave the id out; each such document runs once and is
//! then cleared.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter, EnumString};
use tracing::{debug, warn};

use crate::error::MailboxError;
use crate::mailbox::Mailbox;

/// Highest level a memory edit may set
pub const MAX_LEVEL: u8 = 100;

/// Ten seconds of emulated time
pub const DEFAULT_MAX_HOLD_FRAMES: u32 = 600;

/// Joypad buttons, parsed case-insensitively
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Button {
    A,
    B,
    Start,
    Select,
    Up,
    Down,
    Left,
    Right,
}

/// Values filled in when a document leaves a field out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDefaults {
    pub hold_frames: u32,
    /// Upper bound on a requested hold
    pub max_hold_frames: u32,
}

impl Default for CommandDefaults {
    fn default() -> Self {
        Self {
            hold_frames: 8,
            max_hold_frames: DEFAULT_MAX_HOLD_FRAMES,
        }
    }
}

/// A command document type carried on its own channel
pub trait Command: Sized + Serialize {
    /// Channel name, for logs
    const CHANNEL: &'static str;

    /// Key whose presence makes a document without an `id` a command
    /// anyway. Such a document gets a local id when it is taken.
    const ANONYMOUS_KEY: Option<&'static str> = None;

    fn id(&self) -> &str;

    /// Decode the fields of a document whose id has already been accepted.
    /// `Err` carries the reason the command is dropped.
    fn from_document(id: String, doc: &Value, defaults: &CommandDefaults) -> Result<Self, String>;

    fn to_document(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Accepts string ids and numeric ids; anything else counts as absent.
fn document_id(doc: &Value) -> Option<String> {
    let id = match doc.get("id")? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

/// First present key among `names`
fn field<'a>(doc: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| doc.get(*name)).filter(|v| !v.is_null())
}

fn positive_int(value: &Value) -> Option<u64> {
    value.as_u64().filter(|&n| n > 0)
}

/// Press `button` for `frames` frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCommand {
    pub id: String,
    pub button: Button,
    pub frames: u32,
}

impl ActionCommand {
    pub fn new(id: impl Into<String>, button: Button, frames: u32) -> Self {
        Self {
            id: id.into(),
            button,
            frames,
        }
    }
}

impl Command for ActionCommand {
    const CHANNEL: &'static str = "action";

    fn id(&self) -> &str {
        &self.id
    }

    fn from_document(id: String, doc: &Value, defaults: &CommandDefaults) -> Result<Self, String> {
        let symbol = field(doc, &["button", "target"])
            .and_then(Value::as_str)
            .ok_or("missing button")?;
        let button = Button::from_str(symbol.trim())
            .map_err(|_| format!("unknown button {symbol:?}"))?;
        // Absent or unusable durations fall back rather than drop the press
        let frames = match field(doc, &["frames", "duration"]).and_then(positive_int) {
            Some(n) if n > u64::from(defaults.max_hold_frames) => {
                warn!(%id, requested = n, max = defaults.max_hold_frames, "clamping long hold");
                defaults.max_hold_frames
            }
            Some(n) => n as u32,
            None => defaults.hold_frames,
        };
        Ok(Self { id, button, frames })
    }
}

/// Reset action kinds. Only save-state loading exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResetAction {
    #[default]
    LoadState,
}

/// Load save state `slot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetCommand {
    pub id: String,
    pub action: ResetAction,
    pub slot: u8,
}

impl ResetCommand {
    pub fn load_state(id: impl Into<String>, slot: u8) -> Self {
        Self {
            id: id.into(),
            action: ResetAction::LoadState,
            slot,
        }
    }
}

impl Command for ResetCommand {
    const CHANNEL: &'static str = "reset";

    fn id(&self) -> &str {
        &self.id
    }

    fn from_document(id: String, doc: &Value, _defaults: &CommandDefaults) -> Result<Self, String> {
        let action = doc.get("action").and_then(Value::as_str).unwrap_or_default();
        if !action.eq_ignore_ascii_case("load_state") {
            return Err(format!("unsupported reset action {action:?}"));
        }
        let slot = match field(doc, &["slot"]) {
            None => 1,
            Some(value) => positive_int(value)
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| format!("invalid save slot {value}"))?,
        };
        Ok(Self::load_state(id, slot))
    }
}

/// Memory edit kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EditKind {
    #[default]
    SetStarter,
}

/// Overwrite party slot 0 with `species` at `level`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEditCommand {
    pub id: String,
    pub cmd: EditKind,
    pub species: u8,
    pub level: u8,
}

impl MemoryEditCommand {
    pub fn set_starter(id: impl Into<String>, species: u8, level: u8) -> Self {
        Self {
            id: id.into(),
            cmd: EditKind::SetStarter,
            species,
            level,
        }
    }
}

impl Command for MemoryEditCommand {
    const CHANNEL: &'static str = "memory_edit";
    // Older starter scripts write edits without an id
    const ANONYMOUS_KEY: Option<&'static str> = Some("cmd");

    fn id(&self) -> &str {
        &self.id
    }

    fn from_document(id: String, doc: &Value, _defaults: &CommandDefaults) -> Result<Self, String> {
        let cmd = doc.get("cmd").and_then(Value::as_str).unwrap_or_default();
        if cmd != "set_starter" {
            return Err(format!("unsupported memory edit {cmd:?}"));
        }
        let species = field(doc, &["species"])
            .and_then(positive_int)
            .and_then(|n| u8::try_from(n).ok())
            .ok_or("species must be in 1..=255")?;
        let level = field(doc, &["level"])
            .and_then(positive_int)
            .and_then(|n| u8::try_from(n).ok())
            .filter(|&n| n <= MAX_LEVEL)
            .ok_or("level must be in 1..=100")?;
        Ok(Self::set_starter(id, species, level))
    }
}

/// Last consumed id on one channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLedger {
    last_consumed: Option<String>,
}

impl CommandLedger {
    pub fn last_consumed(&self) -> Option<&str> {
        self.last_consumed.as_deref()
    }

    pub fn is_consumed(&self, id: &str) -> bool {
        self.last_consumed.as_deref() == Some(id)
    }

    pub fn record(&mut self, id: impl Into<String>) {
        self.last_consumed = Some(id.into());
    }
}

/// Outcome of polling a channel once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    /// Nothing pending: missing, blank, cleared, or no id
    Idle,
    /// Body is not JSON; left in place and retried next frame
    Unreadable,
    /// Id matches the last consumed one
    Duplicate(String),
    /// Command was malformed; its id is recorded and the document cleared
    Dropped { id: String, reason: String },
    /// New command. Call [`CommandInbox::acknowledge`] once it has run.
    Deliver(T),
}

impl<T> Delivery<T> {
    pub fn is_idle(&self) -> bool {
        matches!(self, Delivery::Idle)
    }
}

/// Consuming end of one command channel
pub struct CommandInbox<T> {
    mailbox: Box<dyn Mailbox>,
    ledger: CommandLedger,
    last_unreadable: Option<String>,
    anonymous: u64,
    _command: std::marker::PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for CommandInbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandInbox")
            .field("mailbox", &self.mailbox.describe())
            .field("ledger", &self.ledger)
            .finish()
    }
}

impl<T: Command> CommandInbox<T> {
    pub fn new(mailbox: Box<dyn Mailbox>) -> Self {
        Self {
            mailbox,
            ledger: CommandLedger::default(),
            last_unreadable: None,
            anonymous: 0,
            _command: std::marker::PhantomData,
        }
    }

    pub fn ledger(&self) -> &CommandLedger {
        &self.ledger
    }

    pub fn mailbox(&self) -> &dyn Mailbox {
        self.mailbox.as_ref()
    }

    /// Poll the channel once.
    pub fn take(&mut self, defaults: &CommandDefaults) -> Result<Delivery<T>, MailboxError> {
        let Some(body) = self.mailbox.read()? else {
            return Ok(Delivery::Idle);
        };

        let doc: Value = match serde_json::from_str(&body) {
            Ok(doc) => doc,
            Err(e) => {
                if self.last_unreadable.as_deref() != Some(body.as_str()) {
                    warn!(channel = T::CHANNEL, error = %e, "skipping unreadable command document");
                    self.last_unreadable = Some(body);
                }
                return Ok(Delivery::Unreadable);
            }
        };
        self.last_unreadable = None;

        let id = match document_id(&doc) {
            Some(id) => id,
            None if T::ANONYMOUS_KEY.is_some_and(|key| doc.get(key).is_some()) => {
                self.anonymous += 1;
                format!("anonymous-{}", self.anonymous)
            }
            None => return Ok(Delivery::Idle),
        };
        if self.ledger.is_consumed(&id) {
            debug!(channel = T::CHANNEL, %id, "command already consumed");
            return Ok(Delivery::Duplicate(id));
        }

        match T::from_document(id.clone(), &doc, defaults) {
            Ok(command) => Ok(Delivery::Deliver(command)),
            Err(reason) => {
                warn!(channel = T::CHANNEL, %id, %reason, "dropping malformed command");
                self.acknowledge(&id)?;
                Ok(Delivery::Dropped { id, reason })
            }
        }
    }

    /// Record `id` as consumed and clear the document, unless the agent has
    /// already replaced it with a newer command.
    ///
    /// The check and the clear are two mailbox operations. A command written
    /// between them is erased without running, the same outcome as being
    /// overwritten before the bridge polled. Agents that need a press to land
    /// wait for the document to clear before writing the next one.
    pub fn acknowledge(&mut self, id: &str) -> Result<(), MailboxError> {
        self.ledger.record(id);
        let current = self.mailbox.read()?;
        let replaced = current
            .as_deref()
            .and_then(|body| serde_json::from_str::<Value>(body).ok())
            .and_then(|doc| document_id(&doc))
            .is_some_and(|current_id| current_id != id);
        if replaced {
            debug!(channel = T::CHANNEL, %id, "document replaced during execution; not clearing");
            return Ok(());
        }
        self.mailbox.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MemoryMailbox;
    use strum::IntoEnumIterator;

    fn inbox<T: Command>() -> (CommandInbox<T>, MemoryMailbox) {
        let mailbox = MemoryMailbox::new("test");
        (CommandInbox::new(Box::new(mailbox.clone())), mailbox)
    }

    fn parse_action(body: &str) -> Result<ActionCommand, String> {
        let doc: Value = serde_json::from_str(body).unwrap();
        let id = document_id(&doc).unwrap();
        ActionCommand::from_document(id, &doc, &CommandDefaults::default())
    }

    #[test]
    fn test_button_parsing_case_insensitive() {
        assert_eq!(Button::from_str("a").unwrap(), Button::A);
        assert_eq!(Button::from_str("START").unwrap(), Button::Start);
        assert_eq!(Button::from_str("select").unwrap(), Button::Select);
        assert_eq!(Button::from_str("Left").unwrap(), Button::Left);
        assert!(Button::from_str("X").is_err());
        assert_eq!(Button::iter().count(), 8);
    }

    #[test]
    fn test_action_document_aliases_and_defaults() {
        let cmd = parse_action(r#"{"id":"a1","target":"up","duration":12}"#).unwrap();
        assert_eq!(cmd, ActionCommand::new("a1", Button::Up, 12));

        let cmd = parse_action(r#"{"id":"a2","button":"B"}"#).unwrap();
        assert_eq!(cmd.frames, 8);

        let cmd = parse_action(r#"{"id":"a3","button":"B","frames":-4}"#).unwrap();
        assert_eq!(cmd.frames, 8);

        let cmd = parse_action(r#"{"id":7,"button":"a","frames":2,"extra":true}"#).unwrap();
        assert_eq!(cmd.id, "7");
    }

    #[test]
    fn test_long_hold_clamped() {
        let cmd = parse_action(r#"{"id":"h","button":"A","frames":4000000000}"#).unwrap();
        assert_eq!(cmd.frames, DEFAULT_MAX_HOLD_FRAMES);

        let cmd = parse_action(r#"{"id":"h","button":"A","frames":600}"#).unwrap();
        assert_eq!(cmd.frames, 600);
    }

    #[test]
    fn test_action_document_written_by_agent() {
        let cmd = ActionCommand::new("abc12345", Button::Start, 4);
        let value: Value = serde_json::from_str(&cmd.to_document().unwrap()).unwrap();
        assert_eq!(value["id"], "abc12345");
        assert_eq!(value["button"], "START");
        assert_eq!(value["frames"], 4);
    }

    #[test]
    fn test_reset_document() {
        let doc: Value = serde_json::from_str(r#"{"id":"r","action":"load_state"}"#).unwrap();
        let cmd = ResetCommand::from_document("r".into(), &doc, &CommandDefaults::default()).unwrap();
        assert_eq!(cmd.slot, 1);

        let doc: Value = serde_json::from_str(r#"{"id":"r","action":"reboot"}"#).unwrap();
        assert!(ResetCommand::from_document("r".into(), &doc, &CommandDefaults::default()).is_err());

        let doc: Value = serde_json::from_str(r#"{"id":"r","action":"load_state","slot":0}"#).unwrap();
        assert!(ResetCommand::from_document("r".into(), &doc, &CommandDefaults::default()).is_err());

        let json = ResetCommand::load_state("r", 2).to_document().unwrap();
        assert!(json.contains(r#""action":"load_state""#));
    }

    #[test]
    fn test_memory_edit_document() {
        let defaults = CommandDefaults::default();
        let doc: Value =
            serde_json::from_str(r#"{"id":"m","cmd":"set_starter","species":177,"level":5}"#).unwrap();
        let cmd = MemoryEditCommand::from_document("m".into(), &doc, &defaults).unwrap();
        assert_eq!(cmd, MemoryEditCommand::set_starter("m", 177, 5));

        for bad in [
            r#"{"id":"m","cmd":"set_starter","species":0,"level":5}"#,
            r#"{"id":"m","cmd":"set_starter","species":300,"level":5}"#,
            r#"{"id":"m","cmd":"set_starter","species":1,"level":101}"#,
            r#"{"id":"m","cmd":"give_item","species":1,"level":5}"#,
        ] {
            let doc: Value = serde_json::from_str(bad).unwrap();
            assert!(MemoryEditCommand::from_document("m".into(), &doc, &defaults).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_empty_document_is_idle() {
        let (mut inbox, mailbox) = inbox::<ActionCommand>();
        let defaults = CommandDefaults::default();
        assert_eq!(inbox.take(&defaults).unwrap(), Delivery::Idle);
        mailbox.write("{}").unwrap();
        assert_eq!(inbox.take(&defaults).unwrap(), Delivery::Idle);
        mailbox.write(r#"{"id":"","button":"A"}"#).unwrap();
        assert_eq!(inbox.take(&defaults).unwrap(), Delivery::Idle);
        assert_eq!(inbox.ledger().last_consumed(), None);
    }

    #[test]
    fn test_deliver_then_acknowledge() {
        let (mut inbox, mailbox) = inbox::<ActionCommand>();
        let defaults = CommandDefaults::default();
        mailbox.write(r#"{"id":"x1","button":"A","frames":3}"#).unwrap();

        let Delivery::Deliver(cmd) = inbox.take(&defaults).unwrap() else {
            panic!("expected delivery");
        };
        inbox.acknowledge(cmd.id()).unwrap();
        assert_eq!(mailbox.read().unwrap(), None);
        assert_eq!(inbox.ledger().last_consumed(), Some("x1"));
    }

    #[test]
    fn test_resubmitted_id_is_duplicate() {
        let (mut inbox, mailbox) = inbox::<ActionCommand>();
        let defaults = CommandDefaults::default();
        mailbox.write(r#"{"id":"x1","button":"A"}"#).unwrap();
        inbox.take(&defaults).unwrap();
        inbox.acknowledge("x1").unwrap();

        mailbox.write(r#"{"id":"x1","button":"B"}"#).unwrap();
        assert_eq!(inbox.take(&defaults).unwrap(), Delivery::Duplicate("x1".into()));
        // Not cleared either
        assert!(mailbox.read().unwrap().is_some());
    }

    #[test]
    fn test_unknown_button_dropped_and_recorded() {
        let (mut inbox, mailbox) = inbox::<ActionCommand>();
        let defaults = CommandDefaults::default();
        mailbox.write(r#"{"id":"bad","button":"TURBO"}"#).unwrap();
        assert!(matches!(inbox.take(&defaults).unwrap(), Delivery::Dropped { ref id, .. } if id == "bad"));
        assert_eq!(mailbox.read().unwrap(), None);
        assert_eq!(inbox.ledger().last_consumed(), Some("bad"));
    }

    #[test]
    fn test_unreadable_document_left_in_place() {
        let (mut inbox, mailbox) = inbox::<ActionCommand>();
        let defaults = CommandDefaults::default();
        mailbox.write(r#"{"id":"half"#).unwrap();
        assert_eq!(inbox.take(&defaults).unwrap(), Delivery::Unreadable);
        assert_eq!(inbox.take(&defaults).unwrap(), Delivery::Unreadable);
        assert_eq!(mailbox.contents(), r#"{"id":"half"#);
        assert_eq!(inbox.ledger().last_consumed(), None);

        mailbox.write(r#"{"id":"half","button":"A"}"#).unwrap();
        assert!(matches!(inbox.take(&defaults).unwrap(), Delivery::Deliver(_)));
    }

    #[test]
    fn test_memory_edit_without_id_runs_once() {
        let (mut inbox, mailbox) = inbox::<MemoryEditCommand>();
        let defaults = CommandDefaults::default();
        let body = r#"{"cmd":"set_starter","species":92,"level":5}"#;
        mailbox.write(body).unwrap();

        let Delivery::Deliver(cmd) = inbox.take(&defaults).unwrap() else {
            panic!("expected delivery");
        };
        assert_eq!((cmd.species, cmd.level), (92, 5));
        inbox.acknowledge(cmd.id()).unwrap();
        assert_eq!(mailbox.read().unwrap(), None);
        assert_eq!(inbox.take(&defaults).unwrap(), Delivery::Idle);

        // Writing the same edit again is a new request
        mailbox.write(body).unwrap();
        let Delivery::Deliver(again) = inbox.take(&defaults).unwrap() else {
            panic!("expected delivery");
        };
        assert_ne!(again.id, cmd.id);
    }

    #[test]
    fn test_action_without_id_stays_idle() {
        let (mut inbox, mailbox) = inbox::<ActionCommand>();
        mailbox.write(r#"{"cmd":"set_starter","button":"A"}"#).unwrap();
        assert_eq!(inbox.take(&CommandDefaults::default()).unwrap(), Delivery::Idle);
        assert!(mailbox.read().unwrap().is_some());
    }

    #[test]
    fn test_acknowledge_keeps_newer_command() {
        let (mut inbox, mailbox) = inbox::<ActionCommand>();
        let defaults = CommandDefaults::default();
        mailbox.write(r#"{"id":"first","button":"A"}"#).unwrap();
        assert!(matches!(inbox.take(&defaults).unwrap(), Delivery::Deliver(_)));

        // Agent overwrites while the first press is still held
        mailbox.write(r#"{"id":"second","button":"B"}"#).unwrap();
        inbox.acknowledge("first").unwrap();

        let Delivery::Deliver(cmd) = inbox.take(&defaults).unwrap() else {
            panic!("newer command lost");
        };
        assert_eq!(cmd.id, "second");
    }
}
