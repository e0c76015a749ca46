//! Slave memory model
//!
//! Every registered unit identifier owns one [`SlaveData`]: four data tables
//! spanning the full 16-bit address space, zero-initialized at registration.
//! Because every table has [`ADDRESS_SPACE`] cells, any `(address, quantity)`
//! pair that fits below 65536 is in range; handlers only need
//! [`check_range`] to reject pairs that run past the end.

use crate::constants::ADDRESS_SPACE;
use crate::exception::Exception;

/// Validate that `quantity` cells starting at `address` fit in a data table
#[inline]
pub fn check_range(address: u16, quantity: u16) -> Result<usize, Exception> {
    let start = address as usize;
    if start + quantity as usize > ADDRESS_SPACE {
        return Err(Exception::IllegalDataAddress);
    }
    Ok(start)
}

/// 1-bit cells packed eight per byte, least-significant bit first
#[derive(Clone, PartialEq, Eq)]
pub struct BitBank {
    bits: Box<[u8]>,
}

impl BitBank {
    /// Allocate the full address space, all bits off
    pub fn new() -> Self {
        Self {
            bits: vec![0u8; ADDRESS_SPACE / 8].into_boxed_slice(),
        }
    }

    /// Read one bit
    #[inline]
    pub fn get(&self, address: u16) -> bool {
        let idx = address as usize;
        self.bits[idx / 8] & (1 << (idx % 8)) != 0
    }

    /// Write one bit
    #[inline]
    pub fn set(&mut self, address: u16, value: bool) {
        let idx = address as usize;
        let mask = 1 << (idx % 8);
        if value {
            self.bits[idx / 8] |= mask;
        } else {
            self.bits[idx / 8] &= !mask;
        }
    }

    /// Read `quantity` bits starting at `address`, packed for the wire:
    /// bit i of the result is cell `address + i`, high bits of the last byte zero.
    pub fn read_packed(&self, address: u16, quantity: u16) -> Result<Vec<u8>, Exception> {
        let start = check_range(address, quantity)?;
        let mut packed = vec![0u8; (quantity as usize).div_ceil(8)];
        for i in 0..quantity as usize {
            let idx = start + i;
            if self.bits[idx / 8] & (1 << (idx % 8)) != 0 {
                packed[i / 8] |= 1 << (i % 8);
            }
        }
        Ok(packed)
    }

    /// Write `quantity` bits from wire-packed `packed` starting at `address`
    pub fn write_packed(
        &mut self,
        address: u16,
        quantity: u16,
        packed: &[u8],
    ) -> Result<(), Exception> {
        let start = check_range(address, quantity)?;
        if packed.len() < (quantity as usize).div_ceil(8) {
            return Err(Exception::IllegalDataValue);
        }
        for i in 0..quantity as usize {
            let value = packed[i / 8] & (1 << (i % 8)) != 0;
            let idx = start + i;
            let mask = 1 << (idx % 8);
            if value {
                self.bits[idx / 8] |= mask;
            } else {
                self.bits[idx / 8] &= !mask;
            }
        }
        Ok(())
    }
}

impl Default for BitBank {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BitBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = self.bits.iter().map(|b| b.count_ones() as usize).sum::<usize>();
        f.debug_struct("BitBank").field("set_bits", &set).finish()
    }
}

/// 16-bit words addressed individually
#[derive(Clone, PartialEq, Eq)]
pub struct RegisterBank {
    words: Box<[u16]>,
}

impl RegisterBank {
    /// Allocate the full address space, all words zero
    pub fn new() -> Self {
        Self {
            words: vec![0u16; ADDRESS_SPACE].into_boxed_slice(),
        }
    }

    /// Read one register
    #[inline]
    pub fn get(&self, address: u16) -> u16 {
        self.words[address as usize]
    }

    /// Write one register
    #[inline]
    pub fn set(&mut self, address: u16, value: u16) {
        self.words[address as usize] = value;
    }

    /// Borrow `quantity` registers starting at `address`
    pub fn read(&self, address: u16, quantity: u16) -> Result<&[u16], Exception> {
        let start = check_range(address, quantity)?;
        Ok(&self.words[start..start + quantity as usize])
    }

    /// Overwrite registers starting at `address`
    pub fn write(&mut self, address: u16, values: &[u16]) -> Result<(), Exception> {
        let quantity = u16::try_from(values.len()).map_err(|_| Exception::IllegalDataValue)?;
        let start = check_range(address, quantity)?;
        self.words[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RegisterBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nonzero = self.words.iter().filter(|w| **w != 0).count();
        f.debug_struct("RegisterBank")
            .field("nonzero_words", &nonzero)
            .finish()
    }
}

/// Memory bank of one slave
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlaveData {
    /// Read/write single-bit outputs
    pub coils: BitBank,
    /// Read-only single-bit inputs
    pub discrete_inputs: BitBank,
    /// Read/write 16-bit words
    pub holding_registers: RegisterBank,
    /// Read-only 16-bit words (from the client's perspective)
    pub input_registers: RegisterBank,
}

impl SlaveData {
    /// Zero-initialize all four tables at full size
    pub fn allocate() -> Self {
        Self::default()
    }
}
