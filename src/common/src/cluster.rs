use crate::ids::{NodeId, ShardId};
use std::fmt;

/// A node taking part in one map-reduce invocation, with the shards it serves
/// for that invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: NodeId,
    pub shards: Vec<ShardId>,
}

impl ClusterNode {
    pub fn new(id: NodeId, shards: Vec<ShardId>) -> Self {
        Self { id, shards }
    }

    /// Whether the node serves the shard in this invocation.
    pub fn serves(&self, shard: ShardId) -> bool {
        self.shards.contains(&shard)
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Assigns shards to nodes round robin, shard `s` going to node `s % nodes`.
///
/// # Arguments
///
/// * `nodes` - Number of nodes in the cluster.
/// * `shards` - Shards to distribute.
pub fn round_robin(nodes: u32, shards: &[ShardId]) -> Vec<ClusterNode> {
    let mut cluster: Vec<ClusterNode> = (0..nodes)
        .map(|i| ClusterNode::new(NodeId(i), Vec::new()))
        .collect();
    if nodes == 0 {
        return cluster;
    }
    for shard in shards {
        let owner = (*shard % nodes as u64) as usize;
        cluster[owner].shards.push(*shard);
    }
    cluster
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_robin() {
        let cluster = round_robin(2, &[0, 1, 2, 3, 4]);
        assert_eq!(vec![0, 2, 4], cluster[0].shards);
        assert_eq!(vec![1, 3], cluster[1].shards);
        assert!(cluster[1].serves(3));
        assert!(round_robin(0, &[1]).is_empty());
    }
}
