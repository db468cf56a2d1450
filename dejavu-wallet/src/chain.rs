//! Chain families and the concrete networks inside them.
//!
//! A [`ChainFamily`] groups networks that share one wallet/RPC protocol, and
//! each family is served by exactly one adapter. A [`ChainId`] names a single
//! network within a family.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of blockchain sharing a wallet/RPC protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// Account-based EVM chains (EIP-1193 wallets).
    Evm,
    /// Solana.
    Solana,
    /// Sui.
    Sui,
}

impl ChainFamily {
    /// All families, in a stable order.
    pub const ALL: [Self; 3] = [Self::Evm, Self::Solana, Self::Sui];

    /// Lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Solana => "solana",
            Self::Sui => "sui",
        }
    }

    /// Networks belonging to this family.
    #[must_use]
    pub const fn chains(self) -> &'static [ChainId] {
        match self {
            Self::Evm => &EVM_CHAINS,
            Self::Solana => &[ChainId::Solana],
            Self::Sui => &[ChainId::Sui],
        }
    }

    /// The network a connect lands on when the caller does not pick one.
    #[must_use]
    pub const fn default_chain(self) -> ChainId {
        match self {
            Self::Evm => ChainId::Ethereum,
            Self::Solana => ChainId::Solana,
            Self::Sui => ChainId::Sui,
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainFamily {
    type Err = ParseChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|family| family.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseChainError::UnknownFamily(s.to_owned()))
    }
}

const EVM_CHAINS: [ChainId; 5] = [
    ChainId::Ethereum,
    ChainId::Base,
    ChainId::Polygon,
    ChainId::Arbitrum,
    ChainId::Optimism,
];

/// A concrete network within a [`ChainFamily`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    /// Ethereum mainnet.
    Ethereum,
    /// Base.
    Base,
    /// Polygon PoS.
    Polygon,
    /// Arbitrum One.
    Arbitrum,
    /// OP Mainnet.
    Optimism,
    /// Solana mainnet-beta.
    Solana,
    /// Sui mainnet.
    Sui,
}

impl ChainId {
    /// Every known network.
    pub const ALL: [Self; 7] = [
        Self::Ethereum,
        Self::Base,
        Self::Polygon,
        Self::Arbitrum,
        Self::Optimism,
        Self::Solana,
        Self::Sui,
    ];

    /// Lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Base => "base",
            Self::Polygon => "polygon",
            Self::Arbitrum => "arbitrum",
            Self::Optimism => "optimism",
            Self::Solana => "solana",
            Self::Sui => "sui",
        }
    }

    /// The family this network belongs to.
    #[must_use]
    pub const fn family(self) -> ChainFamily {
        match self {
            Self::Ethereum | Self::Base | Self::Polygon | Self::Arbitrum | Self::Optimism => {
                ChainFamily::Evm
            }
            Self::Solana => ChainFamily::Solana,
            Self::Sui => ChainFamily::Sui,
        }
    }

    /// EIP-155 chain id, for EVM networks only.
    #[must_use]
    pub const fn evm_id(self) -> Option<u64> {
        match self {
            Self::Ethereum => Some(1),
            Self::Optimism => Some(10),
            Self::Polygon => Some(137),
            Self::Base => Some(8453),
            Self::Arbitrum => Some(42161),
            Self::Solana | Self::Sui => None,
        }
    }

    /// Map an EIP-155 chain id back to a known network.
    #[must_use]
    pub fn from_evm_id(id: u64) -> Option<Self> {
        EVM_CHAINS
            .into_iter()
            .find(|chain| chain.evm_id() == Some(id))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainId {
    type Err = ParseChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|chain| chain.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseChainError::UnknownChain(s.to_owned()))
    }
}

/// Error returned when parsing a family or chain name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseChainError {
    /// Not one of `evm`, `solana`, `sui`.
    #[error("unknown chain family '{0}'")]
    UnknownFamily(String),
    /// Not a known network name.
    #[error("unknown chain '{0}'")]
    UnknownChain(String),
}
