//! Emulator interface.
//!
//! The real emulator lives in another process or library; the bridge only
//! needs memory access, a joypad, frame stepping and save-state loading.
//! [`RamEmulator`] implements the same interface over a plain 64 KiB
//! address space, for tests and for replaying RAM dumps.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::command::Button;
use crate::error::EmulatorError;
use crate::memory::{MemoryRead, MemoryWrite};

/// Number of save state slots a frontend exposes
pub const SAVE_SLOTS: u8 = 10;

/// Full Game Boy address space
pub const ADDRESS_SPACE: usize = 0x1_0000;

/// Start and size of work RAM
pub const WRAM_START: usize = 0xC000;
pub const WRAM_SIZE: usize = 0x2000;

bitflags! {
    /// Joypad register bits as the emulator sees them
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Joypad: u8 {
        const A = 0x01;
        const B = 0x02;
        const SELECT = 0x04;
        const START = 0x08;
        const RIGHT = 0x10;
        const LEFT = 0x20;
        const UP = 0x40;
        const DOWN = 0x80;
    }
}

impl From<Button> for Joypad {
    fn from(button: Button) -> Self {
        match button {
            Button::A => Joypad::A,
            Button::B => Joypad::B,
            Button::Select => Joypad::SELECT,
            Button::Start => Joypad::START,
            Button::Right => Joypad::RIGHT,
            Button::Left => Joypad::LEFT,
            Button::Up => Joypad::UP,
            Button::Down => Joypad::DOWN,
        }
    }
}

/// What the bridge needs from a running emulator
pub trait Emulator: MemoryRead + MemoryWrite {
    /// Buttons held from the next frame on, until changed
    fn set_joypad(&mut self, buttons: Joypad);

    /// Run one frame.
    fn advance_frame(&mut self);

    /// Load save state `slot`. Memory is replaced wholesale on success.
    fn load_state(&mut self, slot: u8) -> Result<(), EmulatorError>;
}

#[derive(Debug, Clone)]
struct SaveState {
    ram: Vec<u8>,
    frame: u64,
}

/// In-memory emulator: no CPU, just an address space that frames step over.
#[derive(Debug, Clone)]
pub struct RamEmulator {
    ram: Vec<u8>,
    joypad: Joypad,
    frame: u64,
    states: HashMap<u8, SaveState>,
    input_log: Vec<Joypad>,
}

impl Default for RamEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl RamEmulator {
    pub fn new() -> Self {
        Self {
            ram: vec![0; ADDRESS_SPACE],
            joypad: Joypad::empty(),
            frame: 0,
            states: HashMap::new(),
            input_log: Vec::new(),
        }
    }

    /// Build from a memory dump: either the full 64 KiB address space or an
    /// 8 KiB work RAM image (placed at 0xC000).
    pub fn from_dump(bytes: &[u8]) -> Result<Self, EmulatorError> {
        let mut emu = Self::new();
        match bytes.len() {
            ADDRESS_SPACE => emu.ram.copy_from_slice(bytes),
            WRAM_SIZE => emu.ram[WRAM_START..WRAM_START + WRAM_SIZE].copy_from_slice(bytes),
            len => {
                return Err(EmulatorError::Backend(format!(
                    "memory dump is {len} bytes; expected {ADDRESS_SPACE} or {WRAM_SIZE}"
                )));
            }
        }
        Ok(emu)
    }

    /// Frames run since start, rewound by save-state loads
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn joypad(&self) -> Joypad {
        self.joypad
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    /// Joypad state of every frame advanced so far
    pub fn input_log(&self) -> &[Joypad] {
        &self.input_log
    }

    /// Number of frames `buttons` was fully held
    pub fn frames_held(&self, buttons: Joypad) -> usize {
        self.input_log.iter().filter(|held| held.contains(buttons)).count()
    }

    /// Number of distinct presses (rising edges) of `buttons`
    pub fn presses(&self, buttons: Joypad) -> usize {
        let mut previous = false;
        let mut count = 0;
        for held in &self.input_log {
            let now = held.contains(buttons);
            if now && !previous {
                count += 1;
            }
            previous = now;
        }
        count
    }

    pub fn clear_input_log(&mut self) {
        self.input_log.clear();
    }

    fn check_slot(slot: u8) -> Result<(), EmulatorError> {
        if slot == 0 || slot > SAVE_SLOTS {
            Err(EmulatorError::InvalidSlot(slot))
        } else {
            Ok(())
        }
    }

    /// Store the current memory in `slot`.
    pub fn save_state(&mut self, slot: u8) -> Result<(), EmulatorError> {
        Self::check_slot(slot)?;
        self.states.insert(
            slot,
            SaveState {
                ram: self.ram.clone(),
                frame: self.frame,
            },
        );
        Ok(())
    }
}

impl MemoryRead for RamEmulator {
    fn read_u8(&self, addr: u16) -> u8 {
        self.ram[addr as usize]
    }
}

impl MemoryWrite for RamEmulator {
    fn write_u8(&mut self, addr: u16, value: u8) {
        self.ram[addr as usize] = value;
    }
}

impl Emulator for RamEmulator {
    fn set_joypad(&mut self, buttons: Joypad) {
        self.joypad = buttons;
    }

    fn advance_frame(&mut self) {
        self.input_log.push(self.joypad);
        self.frame += 1;
    }

    fn load_state(&mut self, slot: u8) -> Result<(), EmulatorError> {
        Self::check_slot(slot)?;
        let state = self.states.get(&slot).ok_or(EmulatorError::EmptySlot(slot))?;
        self.ram.copy_from_slice(&state.ram);
        self.frame = state.frame;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_button_maps_to_one_bit() {
        let mut all = Joypad::empty();
        for button in Button::iter() {
            let bits = Joypad::from(button);
            assert_eq!(bits.bits().count_ones(), 1, "{button}");
            assert!(!all.intersects(bits));
            all |= bits;
        }
        assert_eq!(all, Joypad::all());
    }

    #[test]
    fn test_from_wram_dump() {
        let mut wram = vec![0u8; WRAM_SIZE];
        wram[0xD162 - WRAM_START] = 3;
        let emu = RamEmulator::from_dump(&wram).unwrap();
        assert_eq!(emu.read_u8(0xD162), 3);
        assert_eq!(emu.read_u8(0x0100), 0);

        assert!(matches!(RamEmulator::from_dump(&[0; 12]), Err(EmulatorError::Backend(_))));
    }

    #[test]
    fn test_save_and_load_state() {
        let mut emu = RamEmulator::new();
        emu.write_u8(0xD162, 1);
        emu.advance_frame();
        emu.save_state(1).unwrap();

        emu.write_u8(0xD162, 4);
        emu.advance_frame();
        emu.load_state(1).unwrap();
        assert_eq!(emu.read_u8(0xD162), 1);
        assert_eq!(emu.frame(), 1);

        assert_eq!(emu.load_state(2), Err(EmulatorError::EmptySlot(2)));
        assert_eq!(emu.load_state(0), Err(EmulatorError::InvalidSlot(0)));
    }

    #[test]
    fn test_input_log_counts_presses() {
        let mut emu = RamEmulator::new();
        emu.set_joypad(Joypad::A);
        emu.advance_frame();
        emu.advance_frame();
        emu.set_joypad(Joypad::empty());
        emu.advance_frame();
        emu.set_joypad(Joypad::A | Joypad::UP);
        emu.advance_frame();

        assert_eq!(emu.frames_held(Joypad::A), 3);
        assert_eq!(emu.presses(Joypad::A), 2);
        assert_eq!(emu.presses(Joypad::UP), 1);
    }
}
