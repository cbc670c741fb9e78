//! VeriBlock block header.

use crate::arith::{decode_compact, hash_to_ubig};
use crate::crypto::sha256;
use crate::hash::{Hash, KeystoneRef, VbkHash};
use crate::params::VbkChainParams;
use crate::validation::{ValidationError, ValidationResult};
use dashu_int::UBig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VbkBlock {
    pub height: u32,
    pub version: u16,
    pub previous_block: VbkHash,
    pub previous_keystone: KeystoneRef,
    pub second_previous_keystone: KeystoneRef,
    pub merkle_root: Hash<16>,
    pub timestamp: u32,
    /// Compact-encoded difficulty, not a target.
    pub difficulty: u32,
    pub nonce: u64,
}

impl VbkBlock {
    fn header_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 2 + 24 + 9 + 9 + 16 + 4 + 4 + 8);
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(self.previous_block.as_ref());
        out.extend_from_slice(self.previous_keystone.as_ref());
        out.extend_from_slice(self.second_previous_keystone.as_ref());
        out.extend_from_slice(self.merkle_root.as_ref());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.difficulty.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out
    }

    pub fn hash(&self) -> VbkHash {
        sha256(&[&self.header_bytes()]).prefix::<24>()
    }

    /// Decoded difficulty value.
    pub fn decoded_difficulty(&self) -> Result<UBig, ValidationError> {
        decode_compact(self.difficulty).map_err(|e| ValidationError::StructuralInvalid {
            code: "bad-difficulty",
            message: e.to_string(),
        })
    }

    /// Highest 192-bit hash value that satisfies `difficulty`.
    pub fn target(&self) -> Result<UBig, ValidationError> {
        let difficulty = self.decoded_difficulty()?;
        if difficulty == UBig::ZERO {
            return Err(ValidationError::StructuralInvalid {
                code: "bad-difficulty",
                message: "difficulty is zero".to_string(),
            });
        }
        Ok(((UBig::ONE << 192) - UBig::ONE) / difficulty)
    }

    /// Work contributed by this header, equal to its difficulty.
    pub fn block_proof(&self) -> UBig {
        self.decoded_difficulty().unwrap_or(UBig::ZERO)
    }

    /// Context-free checks: minimum difficulty and proof of work.
    pub fn check(&self, params: &VbkChainParams) -> ValidationResult<()> {
        let target = self.target()?;
        if self.decoded_difficulty()? < params.minimum_difficulty() {
            return Err(ValidationError::StructuralInvalid {
                code: "bad-difficulty",
                message: format!(
                    "difficulty {:#010x} is below the network minimum",
                    self.difficulty
                ),
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
