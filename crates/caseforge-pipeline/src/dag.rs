//! Kahn topological ordering over id graphs.
//!
//! Used to verify acyclicity of the template's slot skeleton and the
//! event chain's `causes` relation. On failure the surviving unordered
//! ids are returned as a cycle witness for the validator report.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Topologically order `nodes` under the given forward edges.
///
/// Edges map a node to the nodes it points at; edge targets outside
/// `nodes` are ignored (reference checks are the caller's concern).
///
/// # Errors
///
/// When the graph contains a cycle, returns the sorted list of nodes
/// that could not be ordered (every node on or downstream of a cycle).
pub fn topological_order<I>(
    nodes: &BTreeSet<I>,
    edges: &BTreeMap<I, Vec<I>>,
) -> Result<Vec<I>, Vec<I>>
where
    I: Clone + Ord,
{
    let mut indegree: BTreeMap<&I, usize> = nodes.iter().map(|n| (n, 0)).collect();
    for (source, targets) in edges {
        if !nodes.contains(source) {
            continue;
        }
        for target in targets {
            if let Some(count) = indegree.get_mut(target) {
                *count = count.saturating_add(1);
            }
        }
    }

    let mut queue: VecDeque<&I> = indegree
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&node, _)| node)
        .collect();
    let mut ordered = Vec::with_capacity(nodes.len());

    while let Some(node) = queue.pop_front() {
        ordered.push(node.clone());
        if let Some(targets) = edges.get(node) {
            for target in targets {
                if let Some(count) = indegree.get_mut(target) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        queue.push_back(target);
                    }
                }
            }
        }
    }

    if ordered.len() == nodes.len() {
        Ok(ordered)
    } else {
        let ordered_set: BTreeSet<&I> = ordered.iter().collect();
        Err(nodes
            .iter()
            .filter(|n| !ordered_set.contains(n))
            .cloned()
            .collect())
    }
}
