// PoP common library - entities, parameters and validation types

pub mod alt_block;
pub mod arith;
pub mod btc_block;
pub mod crypto;
pub mod endorsement;
pub mod hash;
pub mod params;
pub mod payloads;
pub mod validation;
pub mod vbk_block;

// Flattened re-exports
pub use self::alt_block::AltBlock;
pub use self::btc_block::BtcBlock;
pub use self::endorsement::{BtcEndorsement, Endorsement, VbkEndorsement};
pub use self::hash::{AltHash, BtcHash, Hash, KeystoneRef, PayloadId, VbkHash};
pub use self::params::{
    AltChainParams, BtcChainParams, Network, PopForkParams, PopRewardsCurveParams,
    PopRewardsParams, VbkChainParams,
};
pub use self::payloads::{AltPayloads, Atv, PublicationData, VbkPopTx, Vtb};
pub use self::validation::{ValidationError, ValidationResult, ValidationState, WithStack};
pub use self::vbk_block::VbkBlock;
