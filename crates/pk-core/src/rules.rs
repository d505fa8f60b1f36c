//! Forced evolution rules.
//!
//! Trade evolutions cannot happen in a solo run, so the bridge applies them
//! itself: every `interval` frames each occupied party slot whose species
//! matches a rule trigger at or above the rule's level is rewritten to the
//! replacement species. Only the species bytes are touched.

use serde::{Deserialize, Serialize};

use crate::layout::{Field, Layout};
use crate::memory::{MemoryRead, MemoryWrite};
use crate::snapshot::PARTY_SIZE;

/// Default number of frames between rule passes (one second at 60 fps)
pub const DEFAULT_RULE_INTERVAL: u64 = 60;

/// Trigger species becomes `replacement` once it reaches `min_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionRule {
    pub trigger: u8,
    pub replacement: u8,
    pub min_level: u8,
}

impl EvolutionRule {
    pub const fn new(trigger: u8, replacement: u8, min_level: u8) -> Self {
        Self {
            trigger,
            replacement,
            min_level,
        }
    }

    pub fn matches(&self, species: u8, level: u8) -> bool {
        species == self.trigger && level >= self.min_level
    }

    /// The four trade evolutions, unlocked at level 40
    pub fn trade_evolutions() -> Vec<Self> {
        vec![
            // Kadabra -> Alakazam
            Self::new(64, 65, 40),
            // Machoke -> Machamp
            Self::new(67, 68, 40),
            // Graveler -> Golem
            Self::new(75, 76, 40),
            // Haunter -> Gengar
            Self::new(93, 94, 40),
        ]
    }
}

/// One rewrite performed by a rule pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evolution {
    pub slot: usize,
    pub from: u8,
    pub to: u8,
    pub level: u8,
}

/// Applies [`EvolutionRule`]s to the party in memory
#[derive(Debug, Clone)]
pub struct RuleEngine {
    layout: Layout,
    rules: Vec<EvolutionRule>,
}

impl RuleEngine {
    pub fn new(layout: Layout, rules: Vec<EvolutionRule>) -> Self {
        Self { layout, rules }
    }

    pub fn rules(&self) -> &[EvolutionRule] {
        &self.rules
    }

    /// Run one pass over the party. Re-running is a no-op for evolved slots
    /// because their species no longer matches a trigger.
    pub fn apply<M: MemoryRead + MemoryWrite + ?Sized>(&self, mem: &mut M) -> Vec<Evolution> {
        let mut applied = Vec::new();
        if self.rules.is_empty() {
            return applied;
        }

        let count = self.layout.read(&*mem, Field::PartyCount) as usize;
        // Party memory is not initialized yet; leave it alone
        if count > PARTY_SIZE {
            return applied;
        }

        let species_list = self.layout.spec(Field::PartySpeciesList).addr;
        for slot in 0..count {
            let species = self.layout.read_slot(&*mem, slot, Field::SlotSpecies) as u8;
            let level = self.layout.read_slot(&*mem, slot, Field::SlotLevel) as u8;
            let Some(rule) = self.rules.iter().find(|r| r.matches(species, level)) else {
                continue;
            };

            mem.write_u8(self.layout.addr(Field::SlotSpecies, slot), rule.replacement);
            mem.write_u8(species_list.wrapping_add(slot as u16), rule.replacement);
            applied.push(Evolution {
                slot,
                from: species,
                to: rule.replacement,
                level,
            });
        }
        applied
    }

    /// Overwrite party slot 0 with `species` at `level`: both species bytes
    /// and both level bytes. Returns the species that was replaced, or
    /// `None` when there is no valid party to edit.
    pub fn set_starter<M: MemoryRead + MemoryWrite + ?Sized>(
        &self,
        mem: &mut M,
        species: u8,
        level: u8,
    ) -> Option<u8> {
        let count = self.layout.read(&*mem, Field::PartyCount) as usize;
        if count == 0 || count > PARTY_SIZE {
            return None;
        }
        let previous = self.layout.read_slot(&*mem, 0, Field::SlotSpecies) as u8;
        let species_list = self.layout.spec(Field::PartySpeciesList).addr;
        mem.write_u8(self.layout.addr(Field::SlotSpecies, 0), species);
        mem.write_u8(species_list, species);
        mem.write_u8(self.layout.addr(Field::SlotLevel, 0), level);
        mem.write_u8(self.layout.addr(Field::SlotBoxLevel, 0), level);
        Some(previous)
    }
}

/// Decides when the next rule pass is due, by elapsed bridge frames.
///
/// The check is `>=` rather than a modulo so a long button hold that jumps
/// past a boundary still gets its pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleScheduler {
    interval: u64,
    next_due: u64,
}

impl RuleScheduler {
    pub fn new(interval: u64) -> Self {
        let interval = interval.max(1);
        Self {
            interval,
            next_due: interval,
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn is_due(&self, frame: u64) -> bool {
        frame >= self.next_due
    }

    pub fn mark_ran(&mut self, frame: u64) {
        self.next_due = frame.saturating_add(self.interval);
    }
}

impl Default for RuleScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_RULE_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::GameVersion;

    const SLOT0: usize = 0xD16A;

    fn engine(rules: Vec<EvolutionRule>) -> RuleEngine {
        RuleEngine::new(Layout::builtin(GameVersion::Yellow).unwrap(), rules)
    }

    fn party_of(members: &[(u8, u8)]) -> Vec<u8> {
        let mut mem = vec![0u8; 0x10000];
        mem[0xD162] = members.len() as u8;
        for (i, &(species, level)) in members.iter().enumerate() {
            let base = SLOT0 + i * 44;
            mem[0xD163 + i] = species;
            mem[base] = species;
            mem[base + 1] = 50;
            mem[base + 33] = level;
        }
        mem
    }

    #[test]
    fn test_haunter_evolves_at_threshold() {
        let mut mem = party_of(&[(93, 41)]);
        let before = mem.clone();

        let applied = engine(vec![EvolutionRule::new(93, 94, 40)]).apply(&mut mem);

        assert_eq!(applied, vec![Evolution { slot: 0, from: 93, to: 94, level: 41 }]);
        assert_eq!(mem[SLOT0], 94);
        assert_eq!(mem[0xD163], 94);
        // Nothing else changed
        let changed: Vec<usize> = (0..mem.len()).filter(|&i| mem[i] != before[i]).collect();
        assert_eq!(changed, vec![SLOT0 - 7, SLOT0]);
    }

    #[test]
    fn test_below_threshold_untouched() {
        let mut mem = party_of(&[(93, 39)]);
        let applied = engine(vec![EvolutionRule::new(93, 94, 40)]).apply(&mut mem);
        assert!(applied.is_empty());
        assert_eq!(mem[SLOT0], 93);
    }

    #[test]
    fn test_already_evolved_is_fixed_point() {
        let mut mem = party_of(&[(94, 45)]);
        let before = mem.clone();
        let engine = engine(vec![EvolutionRule::new(93, 94, 40)]);
        assert!(engine.apply(&mut mem).is_empty());
        assert_eq!(mem, before);

        let mut mem = party_of(&[(93, 45)]);
        engine.apply(&mut mem);
        let once = mem.clone();
        assert!(engine.apply(&mut mem).is_empty());
        assert_eq!(mem, once);
    }

    #[test]
    fn test_each_slot_independent() {
        let mut mem = party_of(&[(25, 50), (64, 40), (93, 10), (67, 99)]);
        let applied = engine(EvolutionRule::trade_evolutions()).apply(&mut mem);
        let slots: Vec<usize> = applied.iter().map(|e| e.slot).collect();
        assert_eq!(slots, vec![1, 3]);
        assert_eq!(mem[SLOT0], 25);
        assert_eq!(mem[SLOT0 + 44], 65);
        assert_eq!(mem[SLOT0 + 88], 93);
        assert_eq!(mem[SLOT0 + 132], 68);
    }

    #[test]
    fn test_unoccupied_slots_ignored() {
        let mut mem = party_of(&[(25, 5)]);
        // Leftover data past the party count
        mem[SLOT0 + 44] = 93;
        mem[SLOT0 + 44 + 33] = 60;
        let applied = engine(vec![EvolutionRule::new(93, 94, 40)]).apply(&mut mem);
        assert!(applied.is_empty());
        assert_eq!(mem[SLOT0 + 44], 93);
    }

    #[test]
    fn test_garbage_party_count_skipped() {
        let mut mem = party_of(&[(93, 50)]);
        mem[0xD162] = 0xFF;
        assert!(engine(vec![EvolutionRule::new(93, 94, 40)]).apply(&mut mem).is_empty());
        assert_eq!(mem[SLOT0], 93);
    }

    #[test]
    fn test_set_starter_rewrites_slot_zero() {
        let mut mem = party_of(&[(84, 5), (25, 7)]);
        let previous = engine(Vec::new()).set_starter(&mut mem, 25, 30);
        assert_eq!(previous, Some(84));
        assert_eq!(mem[SLOT0], 25);
        assert_eq!(mem[0xD163], 25);
        assert_eq!(mem[SLOT0 + 33], 30);
        assert_eq!(mem[SLOT0 + 3], 30);
        // Slot 1 untouched
        assert_eq!(mem[SLOT0 + 44 + 33], 7);
    }

    #[test]
    fn test_set_starter_needs_a_party() {
        let mut mem = party_of(&[]);
        assert_eq!(engine(Vec::new()).set_starter(&mut mem, 25, 30), None);
        assert_eq!(mem[SLOT0], 0);
    }

    #[test]
    fn test_scheduler_elapsed_frames() {
        let mut sched = RuleScheduler::new(60);
        assert!(!sched.is_due(0));
        assert!(!sched.is_due(59));
        assert!(sched.is_due(60));
        sched.mark_ran(60);
        assert!(!sched.is_due(100));
        // A hold that jumps from 110 to 125 still triggers
        assert!(sched.is_due(125));
        sched.mark_ran(125);
        assert!(!sched.is_due(184));
        assert!(sched.is_due(185));
    }

    #[test]
    fn test_scheduler_zero_interval_clamped() {
        let sched = RuleScheduler::new(0);
        assert_eq!(sched.interval(), 1);
    }
}
