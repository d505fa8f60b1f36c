//! pk-core: emulator-side half of the pokelink bridge
//!
//! This crate turns the raw work RAM of a running Game Boy emulator into a
//! typed [`Snapshot`] and delivers agent commands back into it. The two sides
//! never share memory: everything crosses a small set of single-slot
//! mailbox documents.
//!
//! - `layout`: where each semantic field lives in memory and how it is encoded
//! - `builder`: assembles a complete snapshot from memory
//! - `rules`: periodic forced evolutions applied to the party
//! - `mailbox`: overwrite-only document slots (file or in-memory)
//! - `command`: action, reset and memory-edit documents plus id tracking
//! - `emulator`: the emulator trait and an in-memory implementation
//! - `driver`: the per-frame emulator-side loop
//! - `config`, `logging`, `error`: startup configuration and diagnostics

pub mod builder;
pub mod command;
pub mod config;
pub mod driver;
pub mod emulator;
pub mod error;
pub mod layout;
pub mod logging;
pub mod mailbox;
pub mod memory;
pub mod rules;
pub mod snapshot;

pub use builder::SnapshotBuilder;
pub use command::{
    ActionCommand, Button, Command, CommandDefaults, CommandInbox, CommandLedger, Delivery,
    MemoryEditCommand, ResetCommand,
};
pub use config::BridgeConfig;
pub use driver::{DriverSettings, EmulatorDriver, FrameReport};
pub use emulator::{Emulator, Joypad, RamEmulator};
pub use error::{ConfigError, EmulatorError, LayoutError, MailboxError};
pub use layout::{Encoding, Field, FieldSpec, GameVersion, Layout, LayoutMap};
pub use mailbox::{FileMailbox, Mailbox, Mailboxes, MemoryMailbox, MemoryMailboxes};
pub use memory::{MemoryRead, MemoryWrite};
pub use rules::{Evolution, EvolutionRule, RuleEngine, RuleScheduler};
pub use snapshot::{BattleMode, BattleSnapshot, PartySlot, Snapshot, StatusFlags, PARTY_SIZE};
