//! Bitcoin block header.

use crate::arith::{decode_compact, hash_to_ubig, work_from_target};
use crate::crypto::sha256d;
use crate::hash::{BtcHash, Hash};
use crate::params::BtcChainParams;
use crate::validation::{ValidationError, ValidationResult};
use dashu_int::UBig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcBlock {
    pub version: u32,
    /// Parent hash, big-endian display order.
    pub previous_block: BtcHash,
    /// Merkle root, big-endian display order.
    pub merkle_root: Hash<32>,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BtcBlock {
    /// Length of the serialized header that is hashed.
    pub const HEADER_SIZE: usize = 80;

    /// Bytes covered by the proof of work, in Bitcoin's wire order.
    pub fn header_bytes(&self) -> [u8; Self::HEADER_SIZE] {
        let mut out = [0u8; Self::HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.previous_block.reversed().as_ref());
        out[36..68].copy_from_slice(self.merkle_root.reversed().as_ref());
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn hash(&self) -> BtcHash {
        sha256d(&self.header_bytes()).reversed()
    }

    /// Target encoded by `bits`.
    pub fn target(&self) -> Result<UBig, ValidationError> {
        decode_compact(self.bits).map_err(|e| ValidationError::StructuralInvalid {
            code: "bad-diffbits",
            message: e.to_string(),
        })
    }

    /// Work contributed by this header.
    pub fn block_proof(&self) -> UBig {
        self.target().map(|t| work_from_target(&t)).unwrap_or(UBig::ZERO)
    }

    /// Context-free checks: difficulty range and proof of work.
    pub fn check(&self, params: &BtcChainParams) -> ValidationResult<()> {
        let target = self.target()?;
        if target == UBig::ZERO || target > params.pow_limit() {
            return Err(ValidationError::StructuralInvalid {
                code: "bad-diffbits",
                message: format!("bits {:#010x} outside of the allowed range", self.bits),
            }
            .into());
        }
        if hash_to_ubig(self.hash().as_ref()) > target {
            return Err(ValidationError::StructuralInvalid {
                code: "high-hash",
                message: format!("proof of work failed for {}", self.hash()),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regtest_genesis_hash() {
        let params = BtcChainParams::regtest();
        assert_eq!(
            params.genesis_block.hash().to_string(),
            "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206"
        );
        assert!(params.genesis_block.check(&params).is_ok());
    }

    #[test]
    fn mainnet_genesis_hash() {
        let params = BtcChainParams::mainnet();
        assert_eq!(
            params.genesis_block.hash().to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
        assert!(params.genesis_block.check(&params).is_ok());
    }

    #[test]
    fn bad_nonce_fails_pow() {
        let params = BtcChainParams::mainnet();
        let mut block = params.genesis_block.clone();
        block.nonce += 1;
        let err = block.check(&params).unwrap_err();
        assert_eq!(err.code(), "high-hash");
    }
}
