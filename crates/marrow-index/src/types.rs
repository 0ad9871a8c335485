//! Fixed-width key/value codecs and pluggable hashing.

use marrow_common::page::PageId;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A fixed-width value that can live in an index page.
///
/// Keys and values are encoded at a fixed byte width so bucket pages can
/// address entries by index without a slot array.
pub trait Storable: Copy + Eq + Hash + std::fmt::Debug + Send + Sync {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Writes the encoded form into `buf[..Self::SIZE]`.
    fn encode(&self, buf: &mut [u8]);

    /// Reads the encoded form from `buf[..Self::SIZE]`.
    fn decode(buf: &[u8]) -> Self;
}

impl Storable for i32 {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }
}

impl Storable for u32 {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }
}

impl Storable for i64 {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        i64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ])
    }
}

impl Storable for u64 {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        u64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ])
    }
}

/// Fixed-width opaque byte key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> Serialize for GenericKey<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.data)
    }
}

impl<'de, const N: usize> Deserialize<'de> for GenericKey<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct GenericKeyVisitor<const N: usize>;

        impl<'de, const N: usize> serde::de::Visitor<'de> for GenericKeyVisitor<N> {
            type Value = GenericKey<N>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "a byte array of length {}", N)
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v.len() != N {
                    return Err(E::invalid_length(v.len(), &self));
                }
                let mut data = [0u8; N];
                data.copy_from_slice(v);
                Ok(GenericKey { data })
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_bytes(&v)
            }
        }

        deserializer.deserialize_bytes(GenericKeyVisitor::<N>)
    }
}

impl<const N: usize> GenericKey<N> {
    /// Creates a key from exactly `N` bytes.
    pub fn new(data: [u8; N]) -> Self {
        Self { data }
    }

    /// Creates a key from a byte slice, zero-padding or truncating to `N`.
    pub fn from_slice(src: &[u8]) -> Self {
        let mut data = [0u8; N];
        let len = src.len().min(N);
        data[..len].copy_from_slice(&src[..len]);
        Self { data }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }
}

impl<const N: usize> Storable for GenericKey<N> {
    const SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.data);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut data = [0u8; N];
        data.copy_from_slice(&buf[..N]);
        Self { data }
    }
}

/// Record identifier: the value type an executor stores in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    /// Page holding the tuple.
    pub page_id: PageId,
    /// Slot within the page.
    pub slot_num: u32,
}

impl Rid {
    /// Creates a record identifier.
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot_num)
    }
}

impl Storable for Rid {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot_num.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            page_id: PageId(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            slot_num: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// Hash function over index keys.
pub trait KeyHash<K>: Send + Sync {
    /// Hashes a key to 32 bits.
    fn hash_key(&self, key: &K) -> u32;
}

/// Fx-style multiply hasher.
const FX_SEED: u64 = 0x517cc1b727220a95;

/// 64-bit Fx-style hasher usable with `std::hash::Hash`.
#[derive(Debug, Default)]
pub struct FxHasher64 {
    state: u64,
}

impl Hasher for FxHasher64 {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state = (self.state.rotate_left(5) ^ b as u64).wrapping_mul(FX_SEED);
        }
    }
}

/// Default key hasher: Fx multiply over the key's `Hash` impl.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyHasher;

impl<K: Hash + Send + Sync> KeyHash<K> for DefaultKeyHasher {
    fn hash_key(&self, key: &K) -> u32 {
        let mut hasher = FxHasher64::default();
        key.hash(&mut hasher);
        let h = hasher.finish();
        (h ^ (h >> 32)) as u32
    }
}

/// Identity hasher for integer keys.
///
/// Maps a key to its own low 32 bits, giving tests and benchmarks a
/// deterministic directory layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityKeyHasher;

impl KeyHash<i32> for IdentityKeyHasher {
    fn hash_key(&self, key: &i32) -> u32 {
        *key as u32
    }
}

impl KeyHash<u32> for IdentityKeyHasher {
    fn hash_key(&self, key: &u32) -> u32 {
        *key
    }
}

impl KeyHash<i64> for IdentityKeyHasher {
    fn hash_key(&self, key: &i64) -> u32 {
        *key as u32
    }
}

impl KeyHash<u64> for IdentityKeyHasher {
    fn hash_key(&self, key: &u64) -> u32 {
        *key as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: Storable>(value: T) {
        let mut buf = vec![0u8; T::SIZE];
        value.encode(&mut buf);
        assert_eq!(T::decode(&buf), value);
    }

    #[test]
    fn test_integer_codecs() {
        roundtrip(0i32);
        roundtrip(-1i32);
        roundtrip(i32::MAX);
        roundtrip(42u32);
        roundtrip(u32::MAX);
        roundtrip(-99i64);
        roundtrip(u64::MAX);
    }

    #[test]
    fn test_generic_key_codec() {
        let key = GenericKey::<16>::from_slice(b"hello world");
        roundtrip(key);
        assert_eq!(&key.as_bytes()[..5], b"hello");
        assert_eq!(key.as_bytes()[11], 0);
    }

    #[test]
    fn test_generic_key_truncates() {
        let key = GenericKey::<4>::from_slice(b"abcdefgh");
        assert_eq!(key.as_bytes(), b"abcd");
    }

    #[test]
    fn test_rid_codec() {
        let rid = Rid::new(PageId(7), 12);
        roundtrip(rid);
        assert_eq!(rid.to_string(), "7:12");
    }

    #[test]
    fn test_default_hasher_is_deterministic() {
        let hasher = DefaultKeyHasher;
        let a = KeyHash::<i32>::hash_key(&hasher, &12345);
        let b = KeyHash::<i32>::hash_key(&hasher, &12345);
        assert_eq!(a, b);
    }

    #[test]
    fn test_default_hasher_spreads_keys() {
        let hasher = DefaultKeyHasher;
        let mut seen = std::collections::HashSet::new();
        for i in 0..1000i32 {
            seen.insert(hasher.hash_key(&i));
        }
        // No catastrophic collisions over a small dense range.
        assert!(seen.len() > 990);
    }

    #[test]
    fn test_identity_hasher() {
        let hasher = IdentityKeyHasher;
        assert_eq!(KeyHash::<i32>::hash_key(&hasher, &7), 7);
        assert_eq!(KeyHash::<u32>::hash_key(&hasher, &9), 9);
        assert_eq!(KeyHash::<i32>::hash_key(&hasher, &-1), u32::MAX);
    }
}
