//! EXO sonde holding register map.
//!
//! The instrument exposes 672 holding registers. Three windows matter for
//! acquisition, each split into 32 parallel slots:
//!
//! ```text
//! 128..160  parameter code per slot (0 = slot unused)
//! 256..288  status per slot (0 = reading available)
//! 384..448  value per slot, two registers forming an f32, low word first
//! ```

use std::fmt;
use std::ops::Range;

/// Number of holding registers read per acquisition.
pub const REGISTER_COUNT: usize = 672;

/// Number of measurement slots.
pub const SLOT_COUNT: usize = 32;

/// Parameter code window.
pub const CODE_WINDOW: Range<u16> = 128..160;

/// Status flag window.
pub const STATUS_WINDOW: Range<u16> = 256..288;

/// Float value window (two registers per slot).
pub const VALUE_WINDOW: Range<u16> = 384..448;

/// Command register that makes the instrument take a fresh sample.
pub const FORCE_SAMPLE_REGISTER: u16 = 1;

/// Value written to [`FORCE_SAMPLE_REGISTER`], before decimal scaling.
pub const FORCE_SAMPLE_VALUE: u16 = 1;

/// Decimal places the force-sample value is scaled by on the wire.
pub const FORCE_SAMPLE_DECIMALS: u32 = 1;

/// Raw word written to [`FORCE_SAMPLE_REGISTER`].
pub const fn force_sample_word() -> u16 {
    FORCE_SAMPLE_VALUE * 10u16.pow(FORCE_SAMPLE_DECIMALS)
}

/// One of the 32 measurement channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u8);

impl Slot {
    /// Slot `index`, if it is below [`SLOT_COUNT`].
    pub fn new(index: usize) -> Option<Self> {
        (index < SLOT_COUNT).then(|| Slot(index as u8))
    }

    /// All slots in ascending order.
    pub fn all() -> impl Iterator<Item = Slot> {
        (0..SLOT_COUNT as u8).map(Slot)
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Address of this slot's parameter code.
    pub fn code_address(self) -> u16 {
        CODE_WINDOW.start + u16::from(self.0)
    }

    /// Address of this slot's status flag.
    pub fn status_address(self) -> u16 {
        STATUS_WINDOW.start + u16::from(self.0)
    }

    /// Address of the low word of this slot's value; the high word follows.
    pub fn value_address(self) -> u16 {
        VALUE_WINDOW.start + 2 * u16::from(self.0)
    }
}

/// Error returned when building a bank from the wrong number of words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("register bank needs {REGISTER_COUNT} words, got {0}")]
pub struct BankSizeError(pub usize);

/// Snapshot of every holding register, indexed by address.
#[derive(Clone, PartialEq, Eq)]
pub struct RegisterBank {
    words: [u16; REGISTER_COUNT],
}

impl RegisterBank {
    pub fn new(words: [u16; REGISTER_COUNT]) -> Self {
        Self { words }
    }

    pub fn code(&self, slot: Slot) -> u16 {
        self.word(slot.code_address())
    }

    pub fn status(&self, slot: Slot) -> u16 {
        self.word(slot.status_address())
    }

    /// Float stored in the slot's value pair, whatever the slot status.
    pub fn value(&self, slot: Slot) -> f32 {
        let low = slot.value_address();
        f32_from_words_le(self.word(low), self.word(low + 1))
    }

    // Every address produced by `Slot` lies below VALUE_WINDOW.end.
    fn word(&self, address: u16) -> u16 {
        self.words[usize::from(address)]
    }
}

impl TryFrom<Vec<u16>> for RegisterBank {
    type Error = BankSizeError;

    fn try_from(words: Vec<u16>) -> Result<Self, Self::Error> {
        let len = words.len();
        let words: [u16; REGISTER_COUNT] = words.try_into().map_err(|_| BankSizeError(len))?;
        Ok(Self::new(words))
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new([0; REGISTER_COUNT])
    }
}

impl fmt::Debug for RegisterBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: Vec<(usize, u16)> = Slot::all()
            .map(|slot| (slot.index(), self.code(slot)))
            .filter(|(_, code)| *code != 0)
            .collect();
        f.debug_struct("RegisterBank")
            .field("len", &REGISTER_COUNT)
            .field("codes", &codes)
            .finish()
    }
}

/// Reassemble an IEEE-754 single from two registers, low word first.
pub fn f32_from_words_le(low: u16, high: u16) -> f32 {
    f32::from_bits((u32::from(high) << 16) | u32::from(low))
}

/// Split an `f32` into the two registers the instrument would hold.
pub fn f32_to_words_le(value: f32) -> (u16, u16) {
    let bits = value.to_bits();
    (bits as u16, (bits >> 16) as u16)
}
