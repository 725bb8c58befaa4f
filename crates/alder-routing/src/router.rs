//! Inode-to-deployment routing.

use alder_core::DeploymentId;
use alder_core::InodeRef;
use thiserror::Error;

use crate::consistent_hash::jump_hash;

/// Routes inodes to the deployment responsible for caching them.
///
/// Routing is a pure function of the inode's parent id and the deployment
/// count, so every node in the fleet computes the same answer without
/// coordination.
#[derive(Debug, Clone, Copy)]
pub struct DeploymentRouter {
    num_deployments: u32,
    local_deployment: DeploymentId,
}

impl DeploymentRouter {
    /// Create a router for `num_deployments` deployments, of which
    /// `local_deployment` is the one this node serves.
    ///
    /// Callers validate the pair via `NodeConfig::validate`; the router
    /// only asserts the invariant.
    pub fn new(num_deployments: u32, local_deployment: DeploymentId) -> Self {
        assert!(num_deployments > 0, "deployment count must be positive");
        assert!(
            local_deployment.as_u32() < num_deployments,
            "local deployment out of range"
        );
        Self {
            num_deployments,
            local_deployment,
        }
    }

    /// The deployment authorized to write this inode.
    pub fn mapped_deployment(&self, inode: &InodeRef) -> DeploymentId {
        DeploymentId(jump_hash(inode.parent_id as u64, self.num_deployments))
    }

    /// Whether the local deployment is authorized to write this inode.
    pub fn authorized_locally(&self, inode: &InodeRef) -> bool {
        self.mapped_deployment(inode) == self.local_deployment
    }

    /// Check a write's whole inode set before any side effect.
    ///
    /// Fails on the first inode owned by another deployment, naming the
    /// offender and the deployment that does own it.
    pub fn authorize_all(&self, inodes: &[InodeRef]) -> Result<(), RoutingError> {
        for inode in inodes {
            let mapped = self.mapped_deployment(inode);
            if mapped != self.local_deployment {
                return Err(RoutingError::UnauthorizedInode {
                    inode_id: inode.inode_id,
                    mapped,
                    local: self.local_deployment,
                });
            }
        }
        Ok(())
    }

    pub fn local_deployment(&self) -> DeploymentId {
        self.local_deployment
    }

    pub fn num_deployments(&self) -> u32 {
        self.num_deployments
    }
}

/// A write targeted an inode owned by another deployment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error(
        "inode {inode_id} may only be modified by deployment {mapped}; this node belongs to deployment {local}"
    )]
    UnauthorizedInode {
        inode_id: i64,
        mapped: DeploymentId,
        local: DeploymentId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router_for(parent_id: i64, num_deployments: u32) -> DeploymentRouter {
        let mapped = DeploymentId(jump_hash(parent_id as u64, num_deployments));
        DeploymentRouter::new(num_deployments, mapped)
    }

    #[test]
    fn siblings_map_to_the_same_deployment() {
        let router = DeploymentRouter::new(5, DeploymentId(0));
        let a = InodeRef::new(100, 50);
        let b = InodeRef::new(101, 50);
        assert_eq!(router.mapped_deployment(&a), router.mapped_deployment(&b));
    }

    #[test]
    fn authorize_all_accepts_locally_owned_inodes() {
        let router = router_for(50, 3);
        let inodes = [InodeRef::new(100, 50), InodeRef::new(101, 50)];
        router.authorize_all(&inodes).unwrap();
    }

    #[test]
    fn authorize_all_names_the_offending_inode() {
        let num_deployments = 3;
        let mapped = DeploymentId(jump_hash(75, num_deployments));
        // Pick a local deployment that is definitely not the mapped one.
        let local = DeploymentId((mapped.as_u32() + 1) % num_deployments);
        let router = DeploymentRouter::new(num_deployments, local);

        let err = router.authorize_all(&[InodeRef::new(300, 75)]).unwrap_err();
        assert_eq!(
            err,
            RoutingError::UnauthorizedInode {
                inode_id: 300,
                mapped,
                local,
            }
        );
        let message = err.to_string();
        assert!(message.contains("inode 300"));
        assert!(message.contains(&format!("deployment {mapped}")));
    }

    #[test]
    fn empty_inode_set_is_authorized() {
        let router = DeploymentRouter::new(3, DeploymentId(2));
        router.authorize_all(&[]).unwrap();
    }
}
