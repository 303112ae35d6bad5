use constants::{HASH_HEX_SIZE, HASH_SIZE};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub mod chain;
pub mod constants;
pub mod merkle;
pub mod mine;

pub use chain::{ExtendError, ExtendOutcome, Ledger};
pub use merkle::{MerkleNode, MerkleTree};

/// Fixed-width SHA-256 digest. Used as content identifier for transactions,
/// merkle nodes and blocks, and as the proof-of-work metric.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; HASH_SIZE]);

/// `previous` value of a block that starts a chain.
pub const GENESIS: Hash = Hash::ZERO;

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_SIZE]);

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Consecutive zero bits counted from the least significant end.
    pub fn trailing_zeros(&self) -> u32 {
        pow::count_trailing_zero_bits(self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_HEX_SIZE {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut out = [0u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Hash(out))
    }
}

// Hex in human readable formats (JSON status output), raw bytes on the wire.
impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; HASH_SIZE]>::deserialize(deserializer).map(Hash)
        }
    }
}

/// Hash an arbitrary payload.
pub fn hash(payload: impl AsRef<[u8]>) -> Hash {
    let digest = Sha256::digest(payload.as_ref());
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest[..]);
    Hash(out)
}

/// Hash the in-order concatenation of `parts`.
pub fn concat_hash(parts: &[Hash]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.0);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest[..]);
    Hash(out)
}

/// An opaque payload. `present == false` marks an empty slot rather than a
/// real transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub value: String,
    pub present: bool,
}

impl Transaction {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            present: true,
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }

    pub fn hash(&self) -> Hash {
        hash(self.value.as_bytes())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub merkle_root: Hash,
    pub previous: Hash,
    pub nonce: Hash,
    /// Required trailing zero bits of the block hash.
    pub difficulty: u32,
}

impl Block {
    pub fn new(merkle_root: Hash, previous: Hash, difficulty: u32) -> Self {
        Self {
            merkle_root,
            previous,
            nonce: Hash::ZERO,
            difficulty,
        }
    }

    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HASH_SIZE * 3);
        bytes.extend_from_slice(&self.previous.0);
        bytes.extend_from_slice(&self.merkle_root.0);
        bytes.extend_from_slice(&self.nonce.0);
        bytes
    }

    pub fn hash(&self) -> Hash {
        concat_hash(&[self.previous, self.merkle_root, self.nonce])
    }

    pub fn is_genesis(&self) -> bool {
        self.previous == GENESIS
    }

    pub fn is_valid(&self) -> bool {
        self.hash().trailing_zeros() >= self.difficulty
    }

    /// Draw random nonces until the block meets its own difficulty.
    pub fn mine<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Hash {
        pow::mine_block(self, rng)
    }
}

pub mod pow {
    use super::{Block, Hash};
    use crate::constants::BYTE;
    use rand::Rng;

    /// Replace the nonce with fresh random values until the number of trailing
    /// zero bits in the block hash is >= `block.difficulty`. Unbounded.
    pub fn mine_block<R: Rng + ?Sized>(block: &mut Block, rng: &mut R) -> Hash {
        loop {
            let hash = block.hash();
            if count_trailing_zero_bits(&hash) >= block.difficulty {
                return hash;
            }
            block.nonce = Hash(rng.gen());
        }
    }

    pub fn count_trailing_zero_bits(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash.0.iter().rev() {
            if *b == 0 {
                total += BYTE as u32;
            } else {
                total += b.trailing_zeros();
                break;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::HASH_BITS;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn trailing_zero_bits_examples() {
        let mut h = Hash::ZERO;
        assert_eq!(pow::count_trailing_zero_bits(&h), HASH_BITS);
        h.0[31] = 0xF0; // 11110000
        assert_eq!(pow::count_trailing_zero_bits(&h), 4);
        h = Hash::ZERO;
        h.0[30] = 0x01; // 00000001 00000000
        assert_eq!(pow::count_trailing_zero_bits(&h), 8);
        h.0[30] = 0x02;
        assert_eq!(pow::count_trailing_zero_bits(&h), 9);
        h.0[0] = 0xFF;
        assert_eq!(h.trailing_zeros(), 9);
    }

    #[test]
    fn trailing_zero_bits_ignores_high_bytes() {
        let mut h = Hash([0xFF; 32]);
        h.0[31] = 0x01;
        assert_eq!(h.trailing_zeros(), 0);
    }

    #[test]
    fn hash_of_payload_matches_sha256() {
        let expected = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert_eq!(hash("hello").to_hex(), expected);
        assert_eq!(Transaction::new("hello").hash().to_hex(), expected);
    }

    #[test]
    fn concat_hash_is_order_sensitive() {
        let a = hash("a");
        let b = hash("b");
        assert_ne!(concat_hash(&[a, b]), concat_hash(&[b, a]));
        let mut joined = a.0.to_vec();
        joined.extend_from_slice(&b.0);
        assert_eq!(concat_hash(&[a, b]), hash(joined));
    }

    #[test]
    fn hash_hex_round_trip() {
        let h = hash("round");
        let parsed: Hash = h.to_hex().parse().unwrap();
        assert_eq!(parsed, h);
        assert!("abc".parse::<Hash>().is_err());
        assert!("zz".repeat(32).parse::<Hash>().is_err());
    }

    #[test]
    fn hash_serializes_as_hex_in_json() {
        let h = hash("json");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn hash_serializes_as_raw_bytes_in_bincode() {
        let h = hash("bincode");
        let bytes = bincode::serialize(&h).unwrap();
        assert_eq!(bytes.len(), 32);
        let back: Hash = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn block_hash_bytes_layout() {
        let block = Block {
            merkle_root: Hash([1u8; 32]),
            previous: Hash([2u8; 32]),
            nonce: Hash([3u8; 32]),
            difficulty: 0,
        };
        let bytes = block.hash_bytes();
        assert_eq!(bytes.len(), 96);
        assert_eq!(&bytes[0..32], &[2u8; 32]);
        assert_eq!(&bytes[32..64], &[1u8; 32]);
        assert_eq!(&bytes[64..96], &[3u8; 32]);
        assert_eq!(block.hash(), hash(bytes));
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let mut block = Block::new(hash("root"), GENESIS, 0);
        let h1 = block.hash();
        block.nonce = hash("nonce");
        assert_ne!(h1, block.hash());
    }

    #[test]
    fn mined_blocks_are_valid_for_small_difficulties() {
        let mut rng = StdRng::seed_from_u64(7);
        for difficulty in 0..=8 {
            let mut block = Block::new(hash(format!("root-{difficulty}")), GENESIS, difficulty);
            let mined = block.mine(&mut rng);
            assert!(block.is_valid());
            assert_eq!(mined, block.hash());
            assert!(mined.trailing_zeros() >= difficulty);
        }
    }

    #[test]
    fn mining_is_deterministic_for_a_seed() {
        let mut a = Block::new(hash("same"), GENESIS, 6);
        let mut b = a.clone();
        a.mine(&mut StdRng::seed_from_u64(99));
        b.mine(&mut StdRng::seed_from_u64(99));
        assert_eq!(a.nonce, b.nonce);
    }

    #[test]
    fn tampered_block_fails_validation() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut block = Block::new(hash("root"), GENESIS, 8);
        block.mine(&mut rng);
        assert!(block.is_valid());
        // A strictly higher claim than the hash supports must fail.
        block.difficulty = block.hash().trailing_zeros() + 1;
        assert!(!block.is_valid());
    }

    #[test]
    fn absent_transaction_is_not_present() {
        let tx = Transaction::absent();
        assert!(!tx.present);
        assert_eq!(tx.hash(), hash(""));
        assert!(Transaction::new("x").present);
    }
}
