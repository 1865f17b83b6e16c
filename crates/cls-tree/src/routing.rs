//! The routing table and one-hop spanning-tree computation (spec §4.7
//! "Topology").
//!
//! A `RouteTable` is a priority-ordered list of `(gateway, covers)` edges,
//! each naming the disjoint subtree of targets reachable through that
//! gateway. It is populated in-memory by the caller (same non-goal as
//! `StaticGroupResolver`: the on-disk `routes.conf`-style loader stays out
//! of scope per spec.md §1) and queried with [`RouteTable::plan`], which
//! partitions a target `NodeSet` into the gateways that cover pieces of it
//! plus whatever remains uncovered ("nodes not in the graph are contacted
//! directly").
//!
//! Planning is deliberately one hop at a time: the root calls `plan` on
//! its own table to pick immediate gateways, and each gateway process
//! (`cls-gateway`) calls `plan` again on *its own* table to decide whether
//! to recurse further. That mirrors §4.7's description of the remote end
//! recursing into its own Task + Engine rather than the root precomputing
//! the whole multi-hop tree up front.

use cls_core::NodeSet;

/// One edge: `gateway` is responsible for every target in `covers`.
/// Declaration order is priority order — the first edge whose `covers`
/// intersects the remaining target set claims that intersection.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    edges: Vec<(String, NodeSet)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self { edges: Vec::new() }
    }

    /// Declare that `gateway` is the next hop for every node in `covers`.
    pub fn add_route(&mut self, gateway: impl Into<String>, covers: NodeSet) -> &mut Self {
        self.edges.push((gateway.into(), covers));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// The gateway responsible for `node`, if any (first matching edge).
    pub fn next_hop(&self, node: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|(_, covers)| covers.contains(node))
            .map(|(gw, _)| gw.as_str())
    }

    /// Partition `targets` into per-gateway disjoint subsets plus whatever
    /// is left uncovered. Each gateway only ever receives what the
    /// previous edges didn't already claim, so the returned subsets are
    /// disjoint by construction (spec §4.7 "each hop covers a disjoint
    /// subset of targets").
    pub fn plan(&self, targets: &NodeSet) -> RoutePlan {
        let mut remaining = targets.clone();
        let mut via_gateway = Vec::new();
        for (gateway, covers) in &self.edges {
            if remaining.is_empty() {
                break;
            }
            let subset = remaining.intersection(covers);
            if subset.is_empty() {
                continue;
            }
            remaining = remaining.difference(&subset);
            via_gateway.push((gateway.clone(), subset));
        }
        RoutePlan {
            direct: remaining,
            via_gateway,
        }
    }
}

/// Result of [`RouteTable::plan`].
#[derive(Clone, Debug)]
pub struct RoutePlan {
    /// Targets with no gateway in the table — contacted directly.
    pub direct: NodeSet,
    /// Gateway name paired with the disjoint subset of targets it is
    /// responsible for, in the table's declaration order.
    pub via_gateway: Vec<(String, NodeSet)>,
}

impl RoutePlan {
    pub fn is_direct_only(&self) -> bool {
        self.via_gateway.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(text: &str) -> NodeSet {
        NodeSet::parse(text, None).unwrap()
    }

    #[test]
    fn uncovered_targets_are_reported_direct() {
        let table = RouteTable::new();
        let plan = table.plan(&ns("node[1-3]"));
        assert!(plan.is_direct_only());
        assert_eq!(plan.direct.length(), 3);
    }

    #[test]
    fn each_gateway_claims_a_disjoint_subset() {
        let mut table = RouteTable::new();
        table.add_route("gw1", ns("node[1-5]"));
        table.add_route("gw2", ns("node[4-10]"));
        let plan = table.plan(&ns("node[1-10]"));
        assert_eq!(plan.via_gateway.len(), 2);
        let (gw1, set1) = &plan.via_gateway[0];
        let (gw2, set2) = &plan.via_gateway[1];
        assert_eq!(gw1, "gw1");
        assert_eq!(set1.length(), 5);
        assert_eq!(gw2, "gw2");
        // gw2's subset excludes node4/node5, already claimed by gw1.
        assert_eq!(set2.length(), 4);
        assert!(plan.direct.is_empty());

        // Disjointness: no target appears in two subsets or in `direct`.
        let mut seen = std::collections::HashSet::new();
        for name in set1.iter().chain(set2.iter()).chain(plan.direct.iter()) {
            assert!(seen.insert(name), "target counted twice in the route plan");
        }
    }

    #[test]
    fn next_hop_reflects_first_matching_edge() {
        let mut table = RouteTable::new();
        table.add_route("gw1", ns("node[1-5]"));
        assert_eq!(table.next_hop("node3"), Some("gw1"));
        assert_eq!(table.next_hop("node9"), None);
    }
}
