//! Chain parameters for the three trees.
//!
//! Parameters are plain structs built from network presets and handed to
//! the trees once at construction. The ALT chain parameters can also be
//! read from a [`config::Config`].

use crate::alt_block::AltBlock;
use crate::arith::decode_compact;
use crate::btc_block::BtcBlock;
use crate::hash::{AltHash, Hash, KeystoneRef, VbkHash};
use crate::vbk_block::VbkBlock;
use anyhow::{Context, Result};
use config::{Config, ConfigError};
use dashu_int::UBig;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::warn;

pub const CONFIG_KEY_NETWORK: &str = "network";

const DEFAULT_ALT_IDENTIFIER: (&str, i64) = ("alt.identifier", 0x3ae6ca);
const DEFAULT_KEYSTONE_INTERVAL: (&str, i64) = ("alt.keystone-interval", 5);
const DEFAULT_SETTLEMENT_INTERVAL: (&str, i64) = ("alt.endorsement-settlement-interval", 500);
const DEFAULT_FINALITY_DELAY: (&str, i64) = ("alt.finality-delay", 100);
const DEFAULT_REWARD_SETTLEMENT_INTERVAL: (&str, i64) = ("alt.reward-settlement-interval", 400);
const DEFAULT_DIFFICULTY_AVERAGING_INTERVAL: (&str, i64) =
    ("alt.difficulty-averaging-interval", 50);
const CONFIG_KEY_BOOTSTRAP_HASH: &str = "alt.bootstrap.hash";
const CONFIG_KEY_BOOTSTRAP_PREVIOUS: &str = "alt.bootstrap.previous";
const DEFAULT_BOOTSTRAP_HEIGHT: (&str, i64) = ("alt.bootstrap.height", 0);
const DEFAULT_BOOTSTRAP_TIMESTAMP: (&str, i64) = ("alt.bootstrap.timestamp", 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Main,
    Test,
    Regtest,
    Alpha,
}

impl Network {
    /// Configured network, regtest when absent or unknown.
    pub fn from_config(config: &Config) -> Self {
        match config.get::<Network>(CONFIG_KEY_NETWORK) {
            Ok(network) => network,
            Err(ConfigError::NotFound(_)) => Network::Regtest,
            Err(e) => {
                warn!(key = CONFIG_KEY_NETWORK, error = %e, "Bad network setting, using regtest");
                Network::Regtest
            }
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Main => write!(f, "main"),
            Network::Test => write!(f, "test"),
            Network::Regtest => write!(f, "regtest"),
            Network::Alpha => write!(f, "alpha"),
        }
    }
}

const BTC_GENESIS_MERKLE_ROOT: [u8; 32] = [
    0x4a, 0x5e, 0x1e, 0x4b, 0xaa, 0xb8, 0x9f, 0x3a, 0x32, 0x51, 0x8a, 0x88, 0xc3, 0x1b, 0xc8,
    0x7f, 0x61, 0x8f, 0x76, 0x67, 0x3e, 0x2c, 0xc7, 0x7a, 0xb2, 0x12, 0x7b, 0x7a, 0xfd, 0xed,
    0xa3, 0x3b,
];

/// Bitcoin network parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcChainParams {
    pub network: Network,
    /// Easiest allowed target in compact form.
    pub pow_limit_bits: u32,
    /// Seconds per retarget period.
    pub pow_target_timespan: u32,
    /// Seconds between blocks.
    pub pow_target_spacing: u32,
    pub allow_min_difficulty_blocks: bool,
    pub pow_no_retargeting: bool,
    pub genesis_block: BtcBlock,
    pub num_blocks_for_bootstrap: usize,
}

impl BtcChainParams {
    fn genesis(timestamp: u32, bits: u32, nonce: u32) -> BtcBlock {
        BtcBlock {
            version: 1,
            previous_block: Hash::default(),
            merkle_root: Hash::new(BTC_GENESIS_MERKLE_ROOT),
            timestamp,
            bits,
            nonce,
        }
    }

    pub fn mainnet() -> Self {
        Self {
            network: Network::Main,
            pow_limit_bits: 0x1d00ffff,
            pow_target_timespan: 14 * 24 * 60 * 60,
            pow_target_spacing: 10 * 60,
            allow_min_difficulty_blocks: false,
            pow_no_retargeting: false,
            genesis_block: Self::genesis(1231006505, 0x1d00ffff, 2083236893),
            num_blocks_for_bootstrap: 2016,
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: Network::Test,
            allow_min_difficulty_blocks: true,
            genesis_block: Self::genesis(1296688602, 0x1d00ffff, 414098458),
            ..Self::mainnet()
        }
    }

    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            pow_limit_bits: 0x207fffff,
            allow_min_difficulty_blocks: true,
            pow_no_retargeting: true,
            genesis_block: Self::genesis(1296688602, 0x207fffff, 2),
            num_blocks_for_bootstrap: 1,
            ..Self::mainnet()
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Main => Self::mainnet(),
            Network::Test | Network::Alpha => Self::testnet(),
            Network::Regtest => Self::regtest(),
        }
    }

    pub fn pow_limit(&self) -> UBig {
        decode_compact(self.pow_limit_bits).unwrap_or(UBig::ZERO)
    }

    /// Blocks per retarget period.
    pub fn difficulty_adjustment_interval(&self) -> u32 {
        self.pow_target_timespan / self.pow_target_spacing
    }
}

/// Fork resolution parameters of a protected chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopForkParams {
    pub keystone_interval: u32,
    /// Max distance between containing and endorsed block.
    pub endorsement_settlement_interval: u32,
    /// Protecting chain blocks needed before a keystone is final.
    pub finality_delay: u32,
    /// Score of an endorsement by how late its proof was published.
    pub relative_score_lookup_table: Vec<f64>,
    pub max_score_normal: f64,
    pub max_score_keystone: f64,
}

impl Default for PopForkParams {
    fn default() -> Self {
        Self {
            keystone_interval: 5,
            endorsement_settlement_interval: 500,
            finality_delay: 100,
            relative_score_lookup_table: vec![
                1.00000000, 1.00000000, 1.00000000, 1.00000000, 1.00000000, 1.00000000,
                1.00000000, 1.00000000, 1.00000000, 1.00000000, 1.00000000, 1.00000000,
                0.48296816, 0.31551694, 0.23325824, 0.18453616, 0.15238463, 0.12961255,
                0.11265630, 0.09955094, 0.08912509, 0.08063761, 0.07359692, 0.06766428,
                0.06259873, 0.05822428, 0.05440941, 0.05105386, 0.04807993, 0.04542644,
                0.04304458, 0.04089495, 0.03894540, 0.03716941, 0.03554497, 0.03405359,
                0.03267969, 0.03141000, 0.03023319, 0.02913950, 0.02812047, 0.02716878,
                0.02627801, 0.02544253, 0.02465739, 0.02391820, 0.02322107, 0.02256255,
                0.02193952, 0.02134922,
            ],
            max_score_normal: 2.0,
            max_score_keystone: 3.0,
        }
    }
}

impl PopForkParams {
    pub fn is_keystone(&self, height: u32) -> bool {
        height % self.keystone_interval == 0
    }

    /// Score of a single endorsement published `lateness` blocks after
    /// the earliest one for the same block.
    pub fn relative_score(&self, lateness: u32) -> f64 {
        self.relative_score_lookup_table
            .get(lateness as usize)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn max_block_score(&self, height: u32) -> f64 {
        if self.is_keystone(height) {
            self.max_score_keystone
        } else {
            self.max_score_normal
        }
    }
}

/// VeriBlock network parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VbkChainParams {
    pub network: Network,
    pub min_difficulty: u64,
    /// `None` on mainnet.
    pub transaction_magic_byte: Option<u8>,
    pub pow_no_retargeting: bool,
    pub genesis_block: VbkBlock,
    pub num_blocks_for_bootstrap: usize,
    pub pop: PopForkParams,
}

impl VbkChainParams {
    fn genesis(difficulty: u32, timestamp: u32) -> VbkBlock {
        VbkBlock {
            height: 0,
            version: 2,
            previous_block: VbkHash::default(),
            previous_keystone: KeystoneRef::default(),
            second_previous_keystone: KeystoneRef::default(),
            merkle_root: Hash::default(),
            timestamp,
            difficulty,
            nonce: 0,
        }
    }

    pub fn mainnet() -> Self {
        Self {
            network: Network::Main,
            // hex(900000000000) = d18c2e2800
            min_difficulty: 900_000_000_000,
            transaction_magic_byte: None,
            pow_no_retargeting: false,
            genesis_block: Self::genesis(0x0600d18d, 1553699059),
            num_blocks_for_bootstrap: 100,
            pop: PopForkParams::default(),
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: Network::Test,
            // hex(100000000) = 5f5e100
            min_difficulty: 100_000_000,
            transaction_magic_byte: Some(0xAA),
            genesis_block: Self::genesis(0x0405f5e1, 1553699987),
            ..Self::mainnet()
        }
    }

    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            min_difficulty: 1,
            transaction_magic_byte: Some(0xBB),
            pow_no_retargeting: true,
            genesis_block: Self::genesis(0x01010000, 1553699059),
            num_blocks_for_bootstrap: 1,
            ..Self::mainnet()
        }
    }

    pub fn alpha() -> Self {
        Self {
            network: Network::Alpha,
            // hex(9999872) = 989600
            min_difficulty: 9_999_872,
            transaction_magic_byte: Some(0xAA),
            genesis_block: Self::genesis(0x04009896, 1553699059),
            ..Self::mainnet()
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Main => Self::mainnet(),
            Network::Test => Self::testnet(),
            Network::Regtest => Self::regtest(),
            Network::Alpha => Self::alpha(),
        }
    }

    pub fn minimum_difficulty(&self) -> UBig {
        UBig::from(self.min_difficulty)
    }
}

/// Shape of the reward curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopRewardsCurveParams {
    /// Rewards start decreasing above this score.
    pub start_of_slope: f64,
    pub slope_normal: f64,
    pub slope_keystone: f64,
}

impl Default for PopRewardsCurveParams {
    fn default() -> Self {
        Self {
            start_of_slope: 1.0,
            slope_normal: 0.2,
            slope_keystone: 0.21325,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopRewardsParams {
    pub keystone_round: u32,
    pub payout_rounds: u32,
    /// Round paid without regard to PoP difficulty.
    pub flat_score_round: u32,
    pub flat_score_round_use: bool,
    /// Multiplier per round; the keystone round has the highest.
    pub round_ratios: Vec<f64>,
    pub max_score_threshold_normal: f64,
    pub max_score_threshold_keystone: f64,
    /// Blocks before the endorsed block averaged into PoP difficulty.
    pub difficulty_averaging_interval: u32,
    /// Blocks to wait before paying for a block.
    pub reward_settlement_interval: u32,
    pub curve: PopRewardsCurveParams,
}

impl Default for PopRewardsParams {
    fn default() -> Self {
        Self {
            keystone_round: 3,
            payout_rounds: 4,
            flat_score_round: 2,
            flat_score_round_use: true,
            round_ratios: vec![0.97, 1.03, 1.07, 3.00],
            max_score_threshold_normal: 2.0,
            max_score_threshold_keystone: 3.0,
            difficulty_averaging_interval: 50,
            reward_settlement_interval: 400,
            curve: PopRewardsCurveParams::default(),
        }
    }
}

/// Parameters of the application chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AltChainParams {
    /// PoP identifier of the chain.
    pub identifier: u64,
    pub bootstrap_block: AltBlock,
    pub pop: PopForkParams,
    pub rewards: PopRewardsParams,
}

impl AltChainParams {
    pub fn new(identifier: u64, bootstrap_block: AltBlock) -> Self {
        Self {
            identifier,
            bootstrap_block,
            pop: PopForkParams::default(),
            rewards: PopRewardsParams::default(),
        }
    }

    /// Read ALT parameters; the bootstrap block hash is mandatory.
    pub fn from_config(config: &Config) -> Result<Self> {
        let hash = config
            .get_string(CONFIG_KEY_BOOTSTRAP_HASH)
            .with_context(|| format!("missing {CONFIG_KEY_BOOTSTRAP_HASH}"))?
            .parse::<AltHash>()
            .with_context(|| format!("bad {CONFIG_KEY_BOOTSTRAP_HASH}"))?;
        let previous_block = match config.get_string(CONFIG_KEY_BOOTSTRAP_PREVIOUS) {
            Ok(s) => s.parse::<AltHash>().with_context(|| format!("bad {CONFIG_KEY_BOOTSTRAP_PREVIOUS}"))?,
            Err(_) => Hash::default(),
        };
        let int = |key: (&str, i64)| config.get_int(key.0).unwrap_or(key.1);

        let bootstrap_block = AltBlock {
            hash,
            previous_block,
            height: u32::try_from(int(DEFAULT_BOOTSTRAP_HEIGHT))?,
            timestamp: u32::try_from(int(DEFAULT_BOOTSTRAP_TIMESTAMP))?,
        };

        let mut params = Self::new(u64::try_from(int(DEFAULT_ALT_IDENTIFIER))?, bootstrap_block);
        params.pop.keystone_interval = u32::try_from(int(DEFAULT_KEYSTONE_INTERVAL))?;
        params.pop.endorsement_settlement_interval =
            u32::try_from(int(DEFAULT_SETTLEMENT_INTERVAL))?;
        params.pop.finality_delay = u32::try_from(int(DEFAULT_FINALITY_DELAY))?;
        params.rewards.reward_settlement_interval =
            u32::try_from(int(DEFAULT_REWARD_SETTLEMENT_INTERVAL))?;
        params.rewards.difficulty_averaging_interval =
            u32::try_from(int(DEFAULT_DIFFICULTY_AVERAGING_INTERVAL))?;

        if params.pop.keystone_interval == 0 {
            anyhow::bail!("{} must be positive", DEFAULT_KEYSTONE_INTERVAL.0);
        }
        Ok(params)
    }
}
