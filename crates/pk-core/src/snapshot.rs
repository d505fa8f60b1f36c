//! State snapshots published once per emulated frame.
//!
//! A snapshot is a complete, immutable read of game state at one frame. It
//! is serialized as one flat JSON document (plus the party array and the
//! battle block) and replaces the previous snapshot in the mailbox.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Number of party slots
pub const PARTY_SIZE: usize = 6;

/// Highest national dex number in generation 1
pub const DEX_SIZE: u16 = 151;

/// Number of badges
pub const BADGE_COUNT: u8 = 8;

/// Wall-clock time a snapshot was read
pub type Timestamp = DateTime<Utc>;

/// Battle state as stored in wIsInBattle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize_repr, Deserialize_repr)]
#[repr(i8)]
pub enum BattleMode {
    /// The player just lost a battle
    Lost = -1,
    #[default]
    None = 0,
    Wild = 1,
    Trainer = 2,
}

impl BattleMode {
    /// Decode the raw byte. Unknown values read as no battle.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0xFF => BattleMode::Lost,
            1 => BattleMode::Wild,
            2 => BattleMode::Trainer,
            _ => BattleMode::None,
        }
    }

    pub fn is_none(self) -> bool {
        self == BattleMode::None
    }
}

bitflags! {
    /// Non-volatile status condition byte.
    ///
    /// Bits 0-2 are a sleep counter, not a flag; see [`StatusFlags::sleep_turns`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusFlags: u8 {
        const SLEEP = 0x07;
        const POISON = 0x08;
        const BURN = 0x10;
        const FREEZE = 0x20;
        const PARALYSIS = 0x40;
    }
}

impl StatusFlags {
    pub fn sleep_turns(self) -> u8 {
        self.bits() & Self::SLEEP.bits()
    }

    pub fn is_asleep(self) -> bool {
        self.sleep_turns() != 0
    }
}

// Manual serde impl: the raw byte is what agents expect
impl Serialize for StatusFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StatusFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = u8::deserialize(deserializer)?;
        Ok(StatusFlags::from_bits_retain(bits))
    }
}

/// One occupied party slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySlot {
    pub species: u8,
    pub hp: u16,
    pub max_hp: u16,
    pub level: u8,
    pub moves: [u8; 4],
    pub pp: [u8; 4],
    pub status: StatusFlags,
    pub type1: u8,
    pub type2: u8,
    pub attack: u16,
    pub defense: u16,
    pub speed: u16,
    pub special: u16,
}

impl PartySlot {
    pub fn is_fainted(&self) -> bool {
        self.hp == 0
    }
}

/// Battle-only fields.
///
/// These are raw memory and are filled in even outside battle; gate on
/// [`Snapshot::in_battle`] (or use [`Snapshot::enemy`]) before trusting them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleSnapshot {
    pub enemy_species: u8,
    pub enemy_hp: u16,
    pub enemy_max_hp: u16,
    pub enemy_level: u8,
    pub selected_move: u8,
    pub pending_damage: u16,
}

/// Complete game state at one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Bridge frame counter, strictly increasing for the life of the bridge
    pub frame: u64,
    pub timestamp: Timestamp,
    /// Raw party count byte; may exceed 6 while memory is uninitialized
    pub party_count: u8,
    pub party: [Option<PartySlot>; PARTY_SIZE],
    pub badges: u8,
    pub money: u32,
    pub pokedex_owned: u16,
    pub pokedex_seen: u16,
    pub item_count: u8,
    pub x: u8,
    pub y: u8,
    pub map: u8,
    pub player_direction: u8,
    pub in_battle: BattleMode,
    pub text_box_id: u8,
    pub menu_item: u8,
    pub battle: BattleSnapshot,
}

impl Snapshot {
    /// Battle block, only when a battle is in progress
    pub fn enemy(&self) -> Option<&BattleSnapshot> {
        if self.in_battle.is_none() {
            None
        } else {
            Some(&self.battle)
        }
    }

    pub fn occupied_slots(&self) -> impl Iterator<Item = (usize, &PartySlot)> {
        self.party
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|s| (i, s)))
    }

    /// Reject reads taken while RAM still holds garbage (title screen,
    /// mid save-state load).
    pub fn is_plausible(&self) -> bool {
        if self.party_count as usize > PARTY_SIZE {
            return false;
        }
        if self.badges > BADGE_COUNT || self.pokedex_owned > DEX_SIZE {
            return false;
        }
        // Early game cannot own far more species than it carries
        !(self.party_count > 0 && self.pokedex_owned > u16::from(self.party_count) + 10)
    }

    /// State right after loading the training checkpoint: intro, or a
    /// single starter with no progress.
    pub fn looks_like_fresh_game(&self) -> bool {
        self.party_count == 0
            || (self.party_count == 1 && self.badges == 0 && self.pokedex_owned <= 2)
    }

    pub fn to_document(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_document(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}
