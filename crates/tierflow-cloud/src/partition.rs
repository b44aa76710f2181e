//! Address space partitioning
//!
//! The base block is split into fixed-size child blocks addressed by one index
//! byte (child prefix = base prefix + 8). Zone `i` gets child `i` for its
//! public tier and child `i + offset` for its private tier, e.g. for
//! `10.0.0.0/16`: `10.0.0.0/24` and `10.0.10.0/24`.

use crate::error::{Result, TopologyError};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// IPv4 block in prefix notation, always normalised to its network address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressBlock(Ipv4Net);

impl AddressBlock {
    pub fn new(net: Ipv4Net) -> Self {
        Self(net.trunc())
    }

    pub fn network(&self) -> Ipv4Addr {
        self.0.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    pub fn as_net(&self) -> &Ipv4Net {
        &self.0
    }

    /// Whether `other` lies completely inside this block
    pub fn contains(&self, other: &AddressBlock) -> bool {
        self.0.contains(&other.0)
    }

    pub fn overlaps(&self, other: &AddressBlock) -> bool {
        self.0.contains(&other.0.network()) || other.0.contains(&self.0.network())
    }
}

impl FromStr for AddressBlock {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<Ipv4Net>()
            .map(AddressBlock::new)
            .map_err(|_| TopologyError::InvalidAddressBlock(s.to_string()))
    }
}

impl TryFrom<String> for AddressBlock {
    type Error = TopologyError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AddressBlock> for String {
    fn from(block: AddressBlock) -> Self {
        block.to_string()
    }
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public and private blocks per zone, in zone order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZonePartition {
    pub public: Vec<AddressBlock>,
    pub private: Vec<AddressBlock>,
}

/// How the base block is carved up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionScheme {
    /// Bits added to the base prefix for each child block
    pub index_bits: u8,
    /// Distance between a zone's public and private child index
    pub private_offset: usize,
}

impl Default for PartitionScheme {
    fn default() -> Self {
        Self {
            index_bits: 8,
            private_offset: 10,
        }
    }
}

impl PartitionScheme {
    fn child_prefix(&self, base: &AddressBlock) -> Option<u8> {
        let prefix = base.prefix_len().checked_add(self.index_bits)?;
        (prefix <= 32 && self.index_bits > 0 && self.index_bits < 32).then_some(prefix)
    }

    /// Largest zone count whose public and private indices all fit and never collide
    pub fn capacity(&self, base: &AddressBlock) -> usize {
        if self.child_prefix(base).is_none() {
            return 0;
        }
        let slots = 1usize << self.index_bits;
        self.private_offset
            .min(slots.saturating_sub(self.private_offset))
    }

    /// Child block number `index` of `base`
    pub fn sub_block(&self, base: &AddressBlock, index: usize) -> Result<AddressBlock> {
        let child_prefix = self.child_prefix(base).ok_or_else(|| {
            TopologyError::InvalidAddressBlock(format!(
                "{} cannot be split into /{} blocks",
                base,
                u32::from(base.prefix_len()) + u32::from(self.index_bits)
            ))
        })?;

        let slots = 1usize << self.index_bits;
        if index >= slots {
            return Err(TopologyError::AddressSpaceExhausted {
                base: base.to_string(),
                requested: index + 1,
                capacity: slots,
            });
        }

        let offset = (index as u32) << (32 - u32::from(child_prefix));
        let address = Ipv4Addr::from(u32::from(base.network()) | offset);
        Ipv4Net::new(address, child_prefix)
            .map(AddressBlock::new)
            .map_err(|_| TopologyError::InvalidAddressBlock(format!("{}/{}", address, child_prefix)))
    }

    /// Split `base` into `zone_count` public and private blocks
    pub fn partition(&self, base: &AddressBlock, zone_count: usize) -> Result<ZonePartition> {
        let capacity = self.capacity(base);
        if zone_count > capacity {
            return Err(TopologyError::AddressSpaceExhausted {
                base: base.to_string(),
                requested: zone_count,
                capacity,
            });
        }

        let public = (0..zone_count)
            .map(|i| self.sub_block(base, i))
            .collect::<Result<Vec<_>>>()?;
        let private = (0..zone_count)
            .map(|i| self.sub_block(base, i + self.private_offset))
            .collect::<Result<Vec<_>>>()?;

        Ok(ZonePartition { public, private })
    }
}

/// Partition with the default scheme (one index byte, private offset 10)
pub fn partition(base: &AddressBlock, zone_count: usize) -> Result<ZonePartition> {
    PartitionScheme::default().partition(base, zone_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn block(s: &str) -> AddressBlock {
        s.parse().unwrap()
    }

    #[test]
    fn test_three_zone_layout() {
        let parts = partition(&block("10.0.0.0/16"), 3).unwrap();

        let public: Vec<String> = parts.public.iter().map(|b| b.to_string()).collect();
        let private: Vec<String> = parts.private.iter().map(|b| b.to_string()).collect();
        assert_eq!(public, ["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24"]);
        assert_eq!(private, ["10.0.10.0/24", "10.0.11.0/24", "10.0.12.0/24"]);
    }

    #[test]
    fn test_base_is_normalised() {
        let base = block("10.0.55.7/16");
        assert_eq!(base.to_string(), "10.0.0.0/16");
        assert_eq!(partition(&base, 1).unwrap().public[0], block("10.0.0.0/24"));
    }

    #[test]
    fn test_invalid_block() {
        assert!(matches!(
            "10.0.0.0/33".parse::<AddressBlock>(),
            Err(TopologyError::InvalidAddressBlock(_))
        ));
        assert!("not-a-cidr".parse::<AddressBlock>().is_err());
    }

    #[test]
    fn test_capacity_exhausted() {
        let base = block("10.0.0.0/16");
        assert_eq!(PartitionScheme::default().capacity(&base), 10);
        assert!(partition(&base, 10).is_ok());
        assert!(matches!(
            partition(&base, 11),
            Err(TopologyError::AddressSpaceExhausted {
                requested: 11,
                capacity: 10,
                ..
            })
        ));
    }

    #[test]
    fn test_prefix_too_long_has_no_capacity() {
        let base = block("10.0.0.0/26");
        assert_eq!(PartitionScheme::default().capacity(&base), 0);
        assert!(matches!(
            partition(&base, 1),
            Err(TopologyError::AddressSpaceExhausted { capacity: 0, .. })
        ));
        assert!(partition(&base, 0).unwrap().public.is_empty());
    }

    #[test]
    fn test_custom_offset() {
        let scheme = PartitionScheme {
            index_bits: 8,
            private_offset: 128,
        };
        let parts = scheme.partition(&block("172.16.0.0/12"), 2).unwrap();
        assert_eq!(parts.public[1], block("172.16.16.0/20"));
        assert_eq!(parts.private[0], block("172.24.0.0/20"));
    }

    #[test]
    fn test_block_serde_roundtrip_as_string() {
        let b = block("10.1.0.0/16");
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "\"10.1.0.0/16\"");
        assert!(serde_json::from_str::<AddressBlock>("\"bogus\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_blocks_are_disjoint_and_nested(
            addr in any::<u32>(),
            prefix in 0u8..=24,
            zones in 0usize..=10,
        ) {
            let base = AddressBlock::new(Ipv4Net::new(Ipv4Addr::from(addr), prefix).unwrap());
            let parts = partition(&base, zones).unwrap();

            prop_assert_eq!(parts.public.len(), zones);
            prop_assert_eq!(parts.private.len(), zones);

            let all: Vec<&AddressBlock> = parts.public.iter().chain(parts.private.iter()).collect();
            for (i, a) in all.iter().enumerate() {
                prop_assert!(base.contains(a));
                for b in &all[i + 1..] {
                    prop_assert!(!a.overlaps(b), "{} overlaps {}", a, b);
                }
            }
        }

        #[test]
        fn prop_partition_is_deterministic(addr in any::<u32>(), zones in 1usize..=10) {
            let base = AddressBlock::new(Ipv4Net::new(Ipv4Addr::from(addr), 16).unwrap());
            prop_assert_eq!(partition(&base, zones).unwrap(), partition(&base, zones).unwrap());
        }
    }
}
