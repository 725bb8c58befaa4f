//! Node, deployment, and operation identifiers.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Identifier of one metadata node process.
///
/// Always positive. A fresh id is generated on every cold start; a node
/// that restarts is a new member as far as its peers are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl NodeId {
    /// Generate a fresh, positive node id.
    pub fn generate() -> Self {
        loop {
            let candidate = (rand::random::<u64>() & (i64::MAX as u64)) as i64;
            if candidate > 0 {
                return Self(candidate);
            }
        }
    }

    /// The decimal string published as this node's group member token.
    pub fn to_token(self) -> String {
        self.0.to_string()
    }

    /// Parse a group member token back into a node id.
    ///
    /// Returns `None` for tokens that are not positive decimal integers.
    pub fn from_token(token: &str) -> Option<Self> {
        token.parse::<i64>().ok().filter(|id| *id > 0).map(Self)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deployment number: which shard of the metadata cache a node serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(pub u32);

impl DeploymentId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single write operation, unique within the issuing
/// node's lifetime.
///
/// The tuple (leader id, op id) is unique across the fleet: leaders never
/// share ids, and a leader never reuses an op id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(pub i64);

impl OpId {
    /// Generate an op id from the most significant half of a random UUID,
    /// with the top bit cleared so the value is non-negative.
    pub fn generate() -> Self {
        let (hi, _lo) = uuid::Uuid::new_v4().as_u64_pair();
        Self((hi & (i64::MAX as u64)) as i64)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the local node process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Process-unique id, regenerated at every cold start.
    pub id: NodeId,
    /// Name of the serverless function this process runs as. Doubles as
    /// the membership group path for the deployment.
    pub function_name: String,
    /// The deployment this node serves.
    pub deployment: DeploymentId,
}

impl NodeIdentity {
    /// Mint the identity for a cold-starting process.
    pub fn generate(function_name: impl Into<String>, deployment: DeploymentId) -> Self {
        Self {
            id: NodeId::generate(),
            function_name: function_name.into(),
            deployment,
        }
    }
}

/// The slice of an inode the consistency core needs: its own id and its
/// parent's id. Routing is keyed on the parent so siblings co-locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeRef {
    pub inode_id: i64,
    pub parent_id: i64,
}

impl InodeRef {
    pub fn new(inode_id: i64, parent_id: i64) -> Self {
        Self { inode_id, parent_id }
    }
}
