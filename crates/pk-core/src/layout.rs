//! Memory layout map (wram.asm addresses)
//!
//! A static table from semantic fields to (address, width, encoding). The
//! table is built once at startup, validated, and frozen into a [`Layout`]
//! which the snapshot builder, the rule engine and the memory editor share.
//!
//! Party slot fields are stored as offsets from the start of a party
//! struct; the absolute address is `party_mons + slot * slot_stride + offset`.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoEnumIterator};

use crate::error::LayoutError;
use crate::memory::MemoryRead;

/// Size of one party_struct in bytes
pub const PARTY_STRUCT_SIZE: u16 = 44;

/// Supported game revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GameVersion {
    #[default]
    Yellow,
}

/// How a field's bytes turn into a number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Encoding {
    /// Raw byte (or a run of raw bytes when width > 1)
    Byte,
    /// Little-endian 16-bit
    U16Le,
    /// Packed binary-coded decimal, two digits per byte, most significant first
    Bcd,
    /// Number of set bits over the whole byte range
    BitCount,
}

/// Semantic fields the bridge knows how to read.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumCount,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Field {
    // Party
    PartyCount,
    /// Species summary list (one byte per slot, parallel to the structs)
    PartySpeciesList,
    /// Start of the first party_struct
    PartyMons,

    // Player
    Money,
    PokedexOwned,
    PokedexSeen,
    ItemCount,
    Badges,
    MapId,
    PlayerX,
    PlayerY,
    PlayerDirection,

    // UI
    InBattle,
    TextBoxId,
    MenuItem,

    // Battle (raw outside battle)
    EnemySpecies,
    EnemyHp,
    EnemyMaxHp,
    EnemyLevel,
    SelectedMove,
    PendingDamage,

    // Offsets inside a party_struct
    SlotSpecies,
    SlotHp,
    SlotBoxLevel,
    SlotStatus,
    SlotType1,
    SlotType2,
    SlotMoves,
    SlotPp,
    SlotLevel,
    SlotMaxHp,
    SlotAttack,
    SlotDefense,
    SlotSpeed,
    SlotSpecial,
}

impl Field {
    /// True for fields addressed relative to a party slot
    pub fn is_slot_relative(self) -> bool {
        matches!(
            self,
            Field::SlotSpecies
                | Field::SlotHp
                | Field::SlotBoxLevel
                | Field::SlotStatus
                | Field::SlotType1
                | Field::SlotType2
                | Field::SlotMoves
                | Field::SlotPp
                | Field::SlotLevel
                | Field::SlotMaxHp
                | Field::SlotAttack
                | Field::SlotDefense
                | Field::SlotSpeed
                | Field::SlotSpecial
        )
    }
}

/// Location and encoding of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Absolute address, or offset within a party_struct for slot fields
    pub addr: u16,
    #[serde(default = "default_width")]
    pub width: u16,
    #[serde(default = "default_encoding")]
    pub encoding: Encoding,
}

fn default_width() -> u16 {
    1
}

fn default_encoding() -> Encoding {
    Encoding::Byte
}

impl FieldSpec {
    pub const fn byte(addr: u16) -> Self {
        Self { addr, width: 1, encoding: Encoding::Byte }
    }

    pub const fn bytes(addr: u16, width: u16) -> Self {
        Self { addr, width, encoding: Encoding::Byte }
    }

    pub const fn u16_le(addr: u16) -> Self {
        Self { addr, width: 2, encoding: Encoding::U16Le }
    }

    pub const fn bcd(addr: u16, width: u16) -> Self {
        Self { addr, width, encoding: Encoding::Bcd }
    }

    pub const fn bit_count(addr: u16, width: u16) -> Self {
        Self { addr, width, encoding: Encoding::BitCount }
    }

    fn check(&self, field: Field) -> Result<(), LayoutError> {
        let ok = match self.encoding {
            Encoding::Byte | Encoding::BitCount => self.width >= 1,
            Encoding::U16Le => self.width == 2,
            // Eight decimal digits still fit a u32
            Encoding::Bcd => (1..=4).contains(&self.width),
        };
        if ok {
            Ok(())
        } else {
            Err(LayoutError::InvalidWidth {
                field,
                width: self.width,
                encoding: match self.encoding {
                    Encoding::Byte => "byte",
                    Encoding::U16Le => "u16_le",
                    Encoding::Bcd => "bcd",
                    Encoding::BitCount => "bit_count",
                },
            })
        }
    }

    /// Raw bytes of the field, `base` added to the address.
    pub fn bytes_at<M: MemoryRead + ?Sized>(&self, mem: &M, base: u16) -> Vec<u8> {
        mem.read_bytes(base.wrapping_add(self.addr), self.width as usize)
    }

    /// Decode an absolute field.
    pub fn decode<M: MemoryRead + ?Sized>(&self, mem: &M) -> u32 {
        self.decode_at(mem, 0)
    }

    /// Decode the field to a number, `base` added to the address.
    ///
    /// Multi-byte `Byte` fields decode to their first byte; use
    /// [`FieldSpec::bytes_at`] for the whole run.
    pub fn decode_at<M: MemoryRead + ?Sized>(&self, mem: &M, base: u16) -> u32 {
        let addr = base.wrapping_add(self.addr);
        match self.encoding {
            Encoding::Byte => u32::from(mem.read_u8(addr)),
            Encoding::U16Le => u32::from(mem.read_u16_le(addr)),
            Encoding::Bcd => decode_bcd(&mem.read_bytes(addr, self.width as usize)),
            Encoding::BitCount => count_bits(&mem.read_bytes(addr, self.width as usize)),
        }
    }
}

/// Decode packed BCD: each byte holds a tens digit (high nibble) and a
/// units digit (low nibble); bytes are concatenated left to right.
///
/// Nibbles above 9 are not rejected; they contribute their raw value.
pub fn decode_bcd(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| {
        let hi = u32::from(b >> 4);
        let lo = u32::from(b & 0x0F);
        acc.wrapping_mul(100).wrapping_add(hi * 10 + lo)
    })
}

/// Total number of set bits across `bytes`.
pub fn count_bits(bytes: &[u8]) -> u32 {
    bytes.iter().map(|b| b.count_ones()).sum()
}

/// Editable layout table. Freeze it with [`LayoutMap::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutMap {
    entries: HashMap<Field, FieldSpec>,
    slot_stride: u16,
}

impl LayoutMap {
    /// Empty map with the given party struct stride
    pub fn new(slot_stride: u16) -> Self {
        Self {
            entries: HashMap::new(),
            slot_stride,
        }
    }

    /// Built-in table for a game revision
    pub fn builtin(version: GameVersion) -> Self {
        match version {
            GameVersion::Yellow => Self::yellow(),
        }
    }

    fn yellow() -> Self {
        use Field::*;

        let mut map = Self::new(PARTY_STRUCT_SIZE);
        let table = [
            (PartyCount, FieldSpec::byte(0xD162)),
            (PartySpeciesList, FieldSpec::bytes(0xD163, 6)),
            (PartyMons, FieldSpec::byte(0xD16A)),
            (Money, FieldSpec::bcd(0xD346, 3)),
            (PokedexOwned, FieldSpec::bit_count(0xD2F6, 19)),
            (PokedexSeen, FieldSpec::bit_count(0xD30A, 19)),
            (ItemCount, FieldSpec::byte(0xD31C)),
            (Badges, FieldSpec::bit_count(0xD355, 1)),
            (MapId, FieldSpec::byte(0xD35D)),
            (PlayerX, FieldSpec::byte(0xD360)),
            (PlayerY, FieldSpec::byte(0xD361)),
            (PlayerDirection, FieldSpec::byte(0xC109)),
            (InBattle, FieldSpec::byte(0xD056)),
            (TextBoxId, FieldSpec::byte(0xCF12)),
            (MenuItem, FieldSpec::byte(0xCC25)),
            (EnemySpecies, FieldSpec::byte(0xCFE4)),
            (EnemyHp, FieldSpec::u16_le(0xCFE5)),
            (EnemyLevel, FieldSpec::byte(0xCFF2)),
            (EnemyMaxHp, FieldSpec::u16_le(0xCFF3)),
            (SelectedMove, FieldSpec::byte(0xCCDB)),
            (PendingDamage, FieldSpec::u16_le(0xD0D6)),
            (SlotSpecies, FieldSpec::byte(0)),
            (SlotHp, FieldSpec::u16_le(1)),
            (SlotBoxLevel, FieldSpec::byte(3)),
            (SlotStatus, FieldSpec::byte(4)),
            (SlotType1, FieldSpec::byte(5)),
            (SlotType2, FieldSpec::byte(6)),
            (SlotMoves, FieldSpec::bytes(8, 4)),
            (SlotPp, FieldSpec::bytes(29, 4)),
            (SlotLevel, FieldSpec::byte(33)),
            (SlotMaxHp, FieldSpec::u16_le(34)),
            (SlotAttack, FieldSpec::u16_le(36)),
            (SlotDefense, FieldSpec::u16_le(38)),
            (SlotSpeed, FieldSpec::u16_le(40)),
            (SlotSpecial, FieldSpec::u16_le(42)),
        ];
        for (field, spec) in table {
            map.insert(field, spec);
        }
        map
    }

    pub fn insert(&mut self, field: Field, spec: FieldSpec) -> Option<FieldSpec> {
        self.entries.insert(field, spec)
    }

    pub fn remove(&mut self, field: Field) -> Option<FieldSpec> {
        self.entries.remove(&field)
    }

    pub fn get(&self, field: Field) -> Result<FieldSpec, LayoutError> {
        self.entries
            .get(&field)
            .copied()
            .ok_or(LayoutError::Unmapped(field))
    }

    pub fn slot_stride(&self) -> u16 {
        self.slot_stride
    }

    pub fn set_slot_stride(&mut self, stride: u16) {
        self.slot_stride = stride;
    }

    /// Apply overrides keyed by snake_case field name.
    pub fn with_overrides<'a, I>(mut self, overrides: I) -> Result<Self, LayoutError>
    where
        I: IntoIterator<Item = (&'a String, &'a FieldSpec)>,
    {
        for (name, spec) in overrides {
            let field = Field::from_str(name)
                .map_err(|_| LayoutError::UnknownField(name.clone()))?;
            self.entries.insert(field, *spec);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        self.resolve().map(|_| ())
    }

    /// Check that every field is mapped with a sane width and freeze the table.
    pub fn resolve(&self) -> Result<Layout, LayoutError> {
        if self.slot_stride == 0 {
            return Err(LayoutError::ZeroStride);
        }
        let mut specs = [FieldSpec::byte(0); Field::COUNT];
        for field in Field::iter() {
            let spec = self.get(field)?;
            spec.check(field)?;
            specs[field as usize] = spec;
        }
        Ok(Layout {
            specs,
            slot_stride: self.slot_stride,
        })
    }
}

/// Validated, immutable layout. Every field is guaranteed to be mapped.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    specs: [FieldSpec; Field::COUNT],
    slot_stride: u16,
}

impl Layout {
    pub fn builtin(version: GameVersion) -> Result<Self, LayoutError> {
        LayoutMap::builtin(version).resolve()
    }

    pub fn spec(&self, field: Field) -> FieldSpec {
        self.specs[field as usize]
    }

    pub fn slot_stride(&self) -> u16 {
        self.slot_stride
    }

    /// Address of the first byte of party slot `slot`
    pub fn slot_base(&self, slot: usize) -> u16 {
        self.spec(Field::PartyMons)
            .addr
            .wrapping_add(self.slot_stride.wrapping_mul(slot as u16))
    }

    /// Absolute address of a field; slot-relative fields resolve against `slot`.
    pub fn addr(&self, field: Field, slot: usize) -> u16 {
        let spec = self.spec(field);
        if field.is_slot_relative() {
            self.slot_base(slot).wrapping_add(spec.addr)
        } else {
            spec.addr
        }
    }

    pub fn read<M: MemoryRead + ?Sized>(&self, mem: &M, field: Field) -> u32 {
        debug_assert!(!field.is_slot_relative(), "{field} needs a slot");
        self.spec(field).decode_at(mem, 0)
    }

    pub fn read_bytes<M: MemoryRead + ?Sized>(&self, mem: &M, field: Field) -> Vec<u8> {
        self.spec(field).bytes_at(mem, 0)
    }

    pub fn read_slot<M: MemoryRead + ?Sized>(&self, mem: &M, slot: usize, field: Field) -> u32 {
        self.spec(field).decode_at(mem, self.slot_base(slot))
    }

    pub fn read_slot_bytes<M: MemoryRead + ?Sized>(
        &self,
        mem: &M,
        slot: usize,
        field: Field,
    ) -> Vec<u8> {
        self.spec(field).bytes_at(mem, self.slot_base(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_bcd_money() {
        assert_eq!(decode_bcd(&[0x12, 0x34, 0x56]), 123456);
        assert_eq!(decode_bcd(&[0x00, 0x30, 0x00]), 3000);
        assert_eq!(decode_bcd(&[]), 0);
    }

    #[test]
    fn test_count_bits_pokedex_range() {
        assert_eq!(count_bits(&[0u8; 19]), 0);
        assert_eq!(count_bits(&[0xFFu8; 19]), 152);
        assert_eq!(count_bits(&[0b1010_0001]), 3);
    }

    #[test]
    fn test_builtin_yellow_resolves() {
        let layout = Layout::builtin(GameVersion::Yellow).unwrap();
        assert_eq!(layout.spec(Field::Money), FieldSpec::bcd(0xD346, 3));
        assert_eq!(layout.slot_base(0), 0xD16A);
        assert_eq!(layout.slot_base(1), 0xD16A + 44);
        assert_eq!(layout.addr(Field::SlotLevel, 2), 0xD16A + 88 + 33);
        assert_eq!(layout.addr(Field::Money, 5), 0xD346);
    }

    #[test]
    fn test_unmapped_field_fails_resolve() {
        let mut map = LayoutMap::builtin(GameVersion::Yellow);
        map.remove(Field::PokedexSeen);
        assert_eq!(map.resolve(), Err(LayoutError::Unmapped(Field::PokedexSeen)));
    }

    #[test]
    fn test_zero_stride_rejected() {
        let mut map = LayoutMap::builtin(GameVersion::Yellow);
        map.set_slot_stride(0);
        assert_eq!(map.resolve(), Err(LayoutError::ZeroStride));
    }

    #[test]
    fn test_invalid_width_rejected() {
        let mut map = LayoutMap::builtin(GameVersion::Yellow);
        map.insert(Field::EnemyHp, FieldSpec { addr: 0xCFE5, width: 3, encoding: Encoding::U16Le });
        assert!(matches!(
            map.resolve(),
            Err(LayoutError::InvalidWidth { field: Field::EnemyHp, width: 3, .. })
        ));
    }

    #[test]
    fn test_overrides_by_name() {
        let mut overrides = HashMap::new();
        overrides.insert("money".to_string(), FieldSpec::bcd(0xD347, 3));
        let layout = LayoutMap::builtin(GameVersion::Yellow)
            .with_overrides(&overrides)
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(layout.spec(Field::Money).addr, 0xD347);
    }

    #[test]
    fn test_unknown_override_rejected() {
        let mut overrides = HashMap::new();
        overrides.insert("rival_name".to_string(), FieldSpec::byte(0xD349));
        let err = LayoutMap::builtin(GameVersion::Yellow)
            .with_overrides(&overrides)
            .unwrap_err();
        assert_eq!(err, LayoutError::UnknownField("rival_name".into()));
    }

    #[test]
    fn test_field_decoding_from_memory() {
        let layout = Layout::builtin(GameVersion::Yellow).unwrap();
        let mut mem = vec![0u8; 0x10000];
        mem[0xD346] = 0x01;
        mem[0xD347] = 0x50;
        mem[0xD348] = 0x00;
        mem[0xD355] = 0b0000_0111;
        mem[0xCFE5] = 0x2C;
        mem[0xCFE6] = 0x01;
        assert_eq!(layout.read(&mem, Field::Money), 15000);
        assert_eq!(layout.read(&mem, Field::Badges), 3);
        assert_eq!(layout.read(&mem, Field::EnemyHp), 300);
    }

    proptest! {
        #[test]
        fn prop_bcd_matches_decimal_digits(n in 0u32..1_000_000) {
            let digits = format!("{n:06}");
            let bytes: Vec<u8> = digits
                .as_bytes()
                .chunks(2)
                .map(|pair| ((pair[0] - b'0') << 4) | (pair[1] - b'0'))
                .collect();
            prop_assert_eq!(decode_bcd(&bytes), n);
        }

        #[test]
        fn prop_count_bits_bounded(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
            let n = count_bits(&bytes);
            prop_assert!(n <= 8 * bytes.len() as u32);
        }
    }
}
