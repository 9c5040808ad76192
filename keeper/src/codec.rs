//! Anchor wire format helpers: discriminators and a minimal Borsh reader.
//!
//! The keeper does not link the on-chain crate; layouts are decoded by hand
//! and must follow the program's field order.

use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;

fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(format!("{namespace}:{name}"));
    let hash = hasher.finalize();
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&hash[..8]);
    disc
}

/// Anchor instruction discriminator: `sha256("global:<name>")[..8]`.
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    discriminator("global", name)
}

/// Anchor event discriminator: `sha256("event:<Name>")[..8]`.
pub fn event_discriminator(name: &str) -> [u8; 8] {
    discriminator("event", name)
}

/// Anchor account discriminator: `sha256("account:<Name>")[..8]`.
pub fn account_discriminator(name: &str) -> [u8; 8] {
    discriminator("account", name)
}

/// Sequential little-endian Borsh reader. Every getter returns `None` once
/// the input is exhausted.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    pub fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    pub fn i64(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    pub fn bytes32(&mut self) -> Option<[u8; 32]> {
        self.take(32)?.try_into().ok()
    }

    pub fn pubkey(&mut self) -> Option<Pubkey> {
        Some(Pubkey::new_from_array(self.bytes32()?))
    }

    /// Borsh `Option<T>`: a tag byte, then the value when the tag is 1.
    pub fn option<T>(&mut self, read: impl FnOnce(&mut Self) -> Option<T>) -> Option<Option<T>> {
        match self.u8()? {
            0 => Some(None),
            1 => Some(Some(read(self)?)),
            _ => None,
        }
    }

    /// Borsh `Vec<T>`: a `u32` length, then the elements.
    pub fn vec<T>(&mut self, mut read: impl FnMut(&mut Self) -> Option<T>) -> Option<Vec<T>> {
        let len = self.u32()? as usize;
        // Cap the preallocation by what the remaining input could hold.
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(read(self)?);
        }
        Some(items)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminators_match_anchor() {
        assert_eq!(
            instruction_discriminator("check_upkeep"),
            [177, 68, 56, 89, 39, 109, 203, 170]
        );
        assert_eq!(
            instruction_discriminator("perform_upkeep"),
            [28, 225, 151, 101, 95, 219, 202, 252]
        );
        assert_eq!(
            event_discriminator("RaffleEntered"),
            [15, 90, 54, 62, 177, 249, 200, 151]
        );
        assert_eq!(
            account_discriminator("Raffle"),
            [143, 133, 63, 173, 138, 10, 142, 200]
        );
    }

    #[test]
    fn reads_fields_in_order() {
        let key = Pubkey::new_from_array([9; 32]);
        let mut data = vec![7u8];
        data.extend_from_slice(&42u64.to_le_bytes());
        data.extend_from_slice(&(-5i64).to_le_bytes());
        data.extend_from_slice(key.as_ref());

        let mut reader = Reader::new(&data);
        assert_eq!(reader.u8(), Some(7));
        assert_eq!(reader.u64(), Some(42));
        assert_eq!(reader.i64(), Some(-5));
        assert_eq!(reader.pubkey(), Some(key));
        assert_eq!(reader.remaining(), 0);
        assert_eq!(reader.u8(), None);
    }

    #[test]
    fn reads_options_and_vecs() {
        let mut data = vec![0u8, 1];
        data.extend_from_slice(&9u64.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&[3, 4]);

        let mut reader = Reader::new(&data);
        assert_eq!(reader.option(|r| r.u64()), Some(None));
        assert_eq!(reader.option(|r| r.u64()), Some(Some(9)));
        assert_eq!(reader.vec(|r| r.u8()), Some(vec![3, 4]));
    }

    #[test]
    fn rejects_truncated_and_invalid_input() {
        assert_eq!(Reader::new(&[1, 2, 3]).u64(), None);
        assert_eq!(Reader::new(&[2]).option(|r| r.u8()), None);

        let mut data = 10u32.to_le_bytes().to_vec();
        data.push(1);
        assert_eq!(Reader::new(&data).vec(|r| r.u8()), None);
    }
}
