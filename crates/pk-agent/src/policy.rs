//! Decision making.
//!
//! Learning lives outside this crate; a [`Policy`] only maps the latest
//! snapshot to the next [`Decision`]. [`RandomPolicy`] is the built-in
//! baseline used by `pokelink run`.

use pk_core::{Button, Snapshot};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Action space, in the order agents index it
pub const ACTIONS: [Button; 8] = [
    Button::Up,
    Button::Down,
    Button::Left,
    Button::Right,
    Button::A,
    Button::B,
    Button::Start,
    Button::Select,
];

/// Button for an action index, if in range
pub fn action_button(index: usize) -> Option<Button> {
    ACTIONS.get(index).copied()
}

/// What the agent does this step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Hold a button; `None` frames means the configured default
    Press { button: Button, frames: Option<u32> },
    /// Reload the training checkpoint
    Reset,
    /// Do nothing this step
    Wait,
}

pub trait Policy {
    fn decide(&mut self, snapshot: &Snapshot) -> Decision;

    /// Called after a reset so episodic state can be dropped.
    fn on_reset(&mut self) {}
}

/// Uniform random buttons, reproducible from a seed.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    rng: StdRng,
    buttons: Vec<Button>,
    /// Chance of pausing for one step instead of pressing
    wait_chance: f64,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            buttons: ACTIONS.to_vec(),
            wait_chance: 0.0,
        }
    }

    /// Restrict to `buttons`. An empty list falls back to the full set.
    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        if !buttons.is_empty() {
            self.buttons = buttons;
        }
        self
    }

    pub fn with_wait_chance(mut self, chance: f64) -> Self {
        self.wait_chance = chance.clamp(0.0, 1.0);
        self
    }
}

impl Policy for RandomPolicy {
    fn decide(&mut self, _snapshot: &Snapshot) -> Decision {
        if self.wait_chance > 0.0 && self.rng.gen_bool(self.wait_chance) {
            return Decision::Wait;
        }
        match self.buttons.choose(&mut self.rng) {
            Some(&button) => Decision::Press {
                button,
                frames: None,
            },
            None => Decision::Wait,
        }
    }
}

/// Presses buttons from a fixed list in order, then waits. Handy for
/// scripted intros and tests.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPolicy {
    steps: Vec<Decision>,
    next: usize,
}

impl ScriptedPolicy {
    pub fn new(steps: Vec<Decision>) -> Self {
        Self { steps, next: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.steps.len().saturating_sub(self.next)
    }
}

impl Policy for ScriptedPolicy {
    fn decide(&mut self, _snapshot: &Snapshot) -> Decision {
        let decision = self.steps.get(self.next).copied().unwrap_or(Decision::Wait);
        self.next += 1;
        decision
    }

    fn on_reset(&mut self) {
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pk_core::snapshot::{BattleMode, BattleSnapshot, Timestamp};

    fn snapshot() -> Snapshot {
        Snapshot {
            frame: 1,
            timestamp: Timestamp::from_timestamp(0, 0).unwrap(),
            party_count: 0,
            party: Default::default(),
            badges: 0,
            money: 0,
            pokedex_owned: 0,
            pokedex_seen: 0,
            item_count: 0,
            x: 0,
            y: 0,
            map: 0,
            player_direction: 0,
            in_battle: BattleMode::None,
            text_box_id: 0,
            menu_item: 0,
            battle: BattleSnapshot::default(),
        }
    }

    #[test]
    fn test_action_indices() {
        assert_eq!(action_button(0), Some(Button::Up));
        assert_eq!(action_button(4), Some(Button::A));
        assert_eq!(action_button(7), Some(Button::Select));
        assert_eq!(action_button(8), None);
    }

    #[test]
    fn test_random_policy_is_seeded() {
        let snap = snapshot();
        let mut a = RandomPolicy::new(42);
        let mut b = RandomPolicy::new(42);
        let run_a: Vec<Decision> = (0..32).map(|_| a.decide(&snap)).collect();
        let run_b: Vec<Decision> = (0..32).map(|_| b.decide(&snap)).collect();
        assert_eq!(run_a, run_b);
    }

    #[test]
    fn test_random_policy_respects_button_subset() {
        let snap = snapshot();
        let mut policy = RandomPolicy::new(7).with_buttons(vec![Button::A, Button::B]);
        for _ in 0..64 {
            match policy.decide(&snap) {
                Decision::Press { button, .. } => assert!(matches!(button, Button::A | Button::B)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_scripted_policy_replays_after_reset() {
        let snap = snapshot();
        let mut policy = ScriptedPolicy::new(vec![
            Decision::Press { button: Button::Start, frames: Some(2) },
            Decision::Reset,
        ]);
        assert!(matches!(policy.decide(&snap), Decision::Press { button: Button::Start, .. }));
        assert_eq!(policy.decide(&snap), Decision::Reset);
        assert_eq!(policy.decide(&snap), Decision::Wait);
        policy.on_reset();
        assert_eq!(policy.remaining(), 2);
    }
}
