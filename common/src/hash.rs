use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Fixed-size digest of `BYTES` bytes.
///
/// Used for block hashes of all three chains and for payload and
/// endorsement identifiers:
///
/// - **32 bytes**: BTC and ALT block hashes, merkle roots, endorsement ids
/// - **24 bytes**: VBK block hashes
/// - **16 bytes**: VBK merkle roots
/// - **9 bytes**: VBK keystone references
///
/// Displays, parses and serializes as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash<const BYTES: usize>([u8; BYTES]);

/// BTC block hash, big-endian display order.
pub type BtcHash = Hash<32>;
/// VBK block hash.
pub type VbkHash = Hash<24>;
/// ALT block hash as supplied by the host chain.
pub type AltHash = Hash<32>;
/// Short reference to a VBK keystone.
pub type KeystoneRef = Hash<9>;
/// Identifier of an endorsement, VTB or ATV.
pub type PayloadId = Hash<32>;

impl<const BYTES: usize> Hash<BYTES> {
    pub const ZERO: Self = Self([0u8; BYTES]);

    pub const fn new(bytes: [u8; BYTES]) -> Self {
        Self(bytes)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Same bytes in reverse order.
    ///
    /// BTC hashes are displayed big-endian while sha256 produces them
    /// little-endian, so headers flip them on the way in and out.
    pub fn reversed(&self) -> Self {
        let mut bytes = self.0;
        bytes.reverse();
        Self(bytes)
    }

    /// Leading `N` bytes, used for short references such as keystone
    /// pointers inside VBK headers. Zero padded when `N > BYTES`.
    pub fn prefix<const N: usize>(&self) -> Hash<N> {
        let mut out = Hash::<N>::ZERO;
        for (dst, src) in out.0.iter_mut().zip(self.0) {
            *dst = src;
        }
        out
    }
}

impl<const BYTES: usize> Default for Hash<BYTES> {
    fn default() -> Self {
        Self::ZERO
    }
}

impl<const BYTES: usize> AsRef<[u8]> for Hash<BYTES> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const BYTES: usize> From<[u8; BYTES]> for Hash<BYTES> {
    fn from(bytes: [u8; BYTES]) -> Self {
        Self(bytes)
    }
}

impl<const BYTES: usize> TryFrom<&[u8]> for Hash<BYTES> {
    type Error = std::array::TryFromSliceError;

    /// Fails when the slice is not exactly `BYTES` long.
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        <[u8; BYTES]>::try_from(slice).map(Self)
    }
}

impl<const BYTES: usize> FromStr for Hash<BYTES> {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = Self::ZERO;
        hex::decode_to_slice(s, &mut out.0)?;
        Ok(out)
    }
}

impl<const BYTES: usize> fmt::Display for Hash<BYTES> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl<const BYTES: usize> fmt::Debug for Hash<BYTES> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash{}({})", BYTES, self)
    }
}

impl<const BYTES: usize> Serialize for Hash<BYTES> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, const BYTES: usize> Deserialize<'de> for Hash<BYTES> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?.parse().map_err(serde::de::Error::custom)
    }
}
