//! Placement of primaries and duplicates
//!
//! Chunk i goes to participant i. Every node holding a primary then receives
//! a duplicate of every other chunk, so each participant ends up with a full
//! replica of the file.

use crate::cluster::NodeId;
use crate::common::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAssignment {
    pub index: u32,
    pub location: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateAssignment {
    /// Index of the chunk being copied
    pub chunk_index: u32,
    /// Node that receives the copy
    pub target: NodeId,
}

pub struct PlacementManager;

impl PlacementManager {
    /// One chunk per participant, in participant order
    pub fn assign_chunks(participants: &[NodeId]) -> Result<Vec<ChunkAssignment>> {
        if participants.is_empty() {
            return Err(Error::InvalidRequest("no participants for placement".into()));
        }

        Ok(participants
            .iter()
            .enumerate()
            .map(|(i, node)| ChunkAssignment {
                index: i as u32,
                location: node.clone(),
            })
            .collect())
    }

    /// For each primary at L(i), a copy of every chunk j != i
    pub fn plan_duplicates(assignments: &[ChunkAssignment]) -> Vec<DuplicateAssignment> {
        let mut plan = Vec::with_capacity(assignments.len() * assignments.len().saturating_sub(1));
        for holder in assignments {
            for chunk in assignments {
                if chunk.index != holder.index {
                    plan.push(DuplicateAssignment {
                        chunk_index: chunk.index,
                        target: holder.location.clone(),
                    });
                }
            }
        }
        plan
    }
}
