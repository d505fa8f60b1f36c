//! Snapshot assembly from raw memory.
//!
//! Every composite field is read into locals first and the [`Snapshot`] is
//! constructed in one expression at the end, so a half-built record is
//! never observable by anything holding the previous snapshot.

use chrono::{DateTime, Utc};

use crate::layout::{Field, Layout};
use crate::memory::MemoryRead;
use crate::snapshot::{BattleMode, BattleSnapshot, PartySlot, Snapshot, StatusFlags, PARTY_SIZE};

// Overrides may give a narrow field a wider encoding; clamp instead of wrapping
fn saturate_u8(value: u32) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

fn saturate_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

/// Builds snapshots against a validated layout
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    layout: Layout,
}

impl SnapshotBuilder {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Read a snapshot stamped with the current wall-clock time.
    pub fn build<M: MemoryRead + ?Sized>(&self, mem: &M, frame: u64) -> Snapshot {
        self.build_at(mem, frame, Utc::now())
    }

    pub fn build_at<M: MemoryRead + ?Sized>(
        &self,
        mem: &M,
        frame: u64,
        timestamp: DateTime<Utc>,
    ) -> Snapshot {
        let layout = &self.layout;
        let byte = |field| saturate_u8(layout.read(mem, field));

        let party_count = byte(Field::PartyCount);
        let occupied = (party_count as usize).min(PARTY_SIZE);
        let mut party: [Option<PartySlot>; PARTY_SIZE] = Default::default();
        for (index, slot) in party.iter_mut().enumerate().take(occupied) {
            *slot = Some(self.read_slot(mem, index));
        }

        let badges = byte(Field::Badges);
        let money = layout.read(mem, Field::Money);
        let pokedex_owned = saturate_u16(layout.read(mem, Field::PokedexOwned));
        let pokedex_seen = saturate_u16(layout.read(mem, Field::PokedexSeen));
        let in_battle = BattleMode::from_raw(byte(Field::InBattle));
        let battle = self.read_battle(mem);

        Snapshot {
            frame,
            timestamp,
            party_count,
            party,
            badges,
            money,
            pokedex_owned,
            pokedex_seen,
            item_count: byte(Field::ItemCount),
            x: byte(Field::PlayerX),
            y: byte(Field::PlayerY),
            map: byte(Field::MapId),
            player_direction: byte(Field::PlayerDirection),
            in_battle,
            text_box_id: byte(Field::TextBoxId),
            menu_item: byte(Field::MenuItem),
            battle,
        }
    }

    fn read_slot<M: MemoryRead + ?Sized>(&self, mem: &M, index: usize) -> PartySlot {
        let layout = &self.layout;
        let byte = |field| saturate_u8(layout.read_slot(mem, index, field));
        let word = |field| saturate_u16(layout.read_slot(mem, index, field));

        let mut moves = [0u8; 4];
        let mut pp = [0u8; 4];
        for (dst, src) in moves
            .iter_mut()
            .zip(layout.read_slot_bytes(mem, index, Field::SlotMoves))
        {
            *dst = src;
        }
        for (dst, src) in pp
            .iter_mut()
            .zip(layout.read_slot_bytes(mem, index, Field::SlotPp))
        {
            *dst = src;
        }

        PartySlot {
            species: byte(Field::SlotSpecies),
            hp: word(Field::SlotHp),
            max_hp: word(Field::SlotMaxHp),
            level: byte(Field::SlotLevel),
            moves,
            pp,
            status: StatusFlags::from_bits_retain(byte(Field::SlotStatus)),
            type1: byte(Field::SlotType1),
            type2: byte(Field::SlotType2),
            attack: word(Field::SlotAttack),
            defense: word(Field::SlotDefense),
            speed: word(Field::SlotSpeed),
            special: word(Field::SlotSpecial),
        }
    }

    fn read_battle<M: MemoryRead + ?Sized>(&self, mem: &M) -> BattleSnapshot {
        let layout = &self.layout;
        BattleSnapshot {
            enemy_species: saturate_u8(layout.read(mem, Field::EnemySpecies)),
            enemy_hp: saturate_u16(layout.read(mem, Field::EnemyHp)),
            enemy_max_hp: saturate_u16(layout.read(mem, Field::EnemyMaxHp)),
            enemy_level: saturate_u8(layout.read(mem, Field::EnemyLevel)),
            selected_move: saturate_u8(layout.read(mem, Field::SelectedMove)),
            pending_damage: saturate_u16(layout.read(mem, Field::PendingDamage)),
        }
    }
}
