//! Node identifiers
//!
//! A node identifier has the shape `<label>-<number>`. The cluster-wide order
//! used by the election compares the numeric suffix as an arbitrary-precision
//! integer, so `worker-9 < other-10` even though the strings sort the other way.

use crate::common::{Error, Result};
use num_bigint::BigUint;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    raw: String,
    rank: BigUint,
}

impl NodeId {
    /// Parse an identifier, rejecting anything without a numeric suffix
    pub fn parse(raw: &str) -> Result<Self> {
        let suffix = raw
            .rsplit_once('-')
            .map(|(_, suffix)| suffix)
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| {
                Error::InvalidNodeId(format!("{:?} has no numeric suffix", raw))
            })?;

        let rank = BigUint::from_str(suffix)
            .map_err(|e| Error::InvalidNodeId(format!("{:?}: {}", raw, e)))?;

        Ok(Self {
            raw: raw.to_string(),
            rank,
        })
    }

    /// Generate `<random-label>-<random-u64>`
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let label: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|b| (b as char).to_ascii_lowercase())
            .collect();
        let suffix: u64 = rng.gen();
        Self {
            raw: format!("{}-{}", label, suffix),
            rank: BigUint::from(suffix),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Numeric rank used for the election order
    pub fn rank(&self) -> &BigUint {
        &self.rank
    }

    /// Strictly higher in the election order
    pub fn outranks(&self, other: &NodeId) -> bool {
        self.rank > other.rank
    }
}

impl PartialEq for NodeId {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for NodeId {}

impl Hash for NodeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        // distinct ids sharing a suffix are a misconfiguration; fall back to
        // the raw text so Ord stays consistent with Eq
        self.rank
            .cmp(&other.rank)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::parse(s).unwrap()
    }

    #[test]
    fn test_numeric_not_lexical() {
        assert!(id("zeta-10").outranks(&id("alpha-9")));
        assert!(!id("alpha-9").outranks(&id("zeta-10")));
        assert!(id("a-12") > id("b-7"));
    }

    #[test]
    fn test_beyond_u64() {
        let big = id("node-340282366920938463463374607431768211456");
        let small = id("node-18446744073709551615");
        assert!(big.outranks(&small));
    }

    #[test]
    fn test_strict_total_order() {
        let ids = [id("x-5"), id("y-12"), id("z-7")];
        for a in &ids {
            assert!(!a.outranks(a));
            for b in &ids {
                if a != b {
                    assert!(a.outranks(b) ^ b.outranks(a));
                }
            }
        }
        assert_eq!(ids.iter().max().unwrap().as_str(), "y-12");
    }

    #[test]
    fn test_invalid_suffix() {
        assert!(matches!(
            NodeId::parse("worker-abc"),
            Err(Error::InvalidNodeId(_))
        ));
        assert!(NodeId::parse("worker").is_err());
        assert!(NodeId::parse("worker-").is_err());
        assert!(NodeId::parse("worker--3").is_ok());
    }

    #[test]
    fn test_generate_parses_back() {
        let generated = NodeId::generate();
        let parsed = id(generated.as_str());
        assert_eq!(parsed, generated);
        assert_eq!(parsed.rank(), generated.rank());
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let json = serde_json::to_string(&id("n-42")).unwrap();
        assert_eq!(json, "\"n-42\"");
        assert!(serde_json::from_str::<NodeId>("\"n-forty\"").is_err());
    }
}
