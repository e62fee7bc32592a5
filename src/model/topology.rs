use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

/// Error type for topology operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError<K: Debug + Clone> {
    /// Cycle detected in the graph; `node` lies on the cycle
    CycleDetected { node: K },
}

impl<K: Debug + Clone> std::fmt::Display for TopologyError<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyError::CycleDetected { node } => write!(f, "Cycle detected at {:?}", node),
        }
    }
}

impl<K: Debug + Clone> std::error::Error for TopologyError<K> {}

/// Generic topological sort using DFS over dependencies
///
/// # Arguments
/// * `nodes` - Iterator over all nodes to sort, in insertion order
/// * `get_dependencies` - Function that returns the dependencies (predecessors) for a node
///
/// # Returns
/// A vector of nodes in dependency order (dependencies before dependents), or an error
/// naming a node on the first cycle found.
///
/// Each node is emitted right after its last unvisited dependency, and independent nodes
/// keep their insertion order, so the result is deterministic and keeps producer/consumer
/// chains adjacent.
pub fn topological_sort<K>(
    nodes: impl IntoIterator<Item = K>,
    get_dependencies: impl Fn(&K) -> Vec<K>,
) -> Result<Vec<K>, TopologyError<K>>
where
    K: Hash + Eq + Clone + Debug,
{
    let nodes: Vec<K> = nodes.into_iter().collect();

    let mut dependencies: HashMap<K, Vec<K>> = HashMap::with_capacity(nodes.len());
    for node in &nodes {
        dependencies.insert(node.clone(), get_dependencies(node));
    }

    let mut sorted = Vec::with_capacity(nodes.len());
    let mut visited = HashSet::new();
    let mut recursion_stack = HashSet::new();

    fn visit<K>(
        node: K,
        dependencies: &HashMap<K, Vec<K>>,
        visited: &mut HashSet<K>,
        recursion_stack: &mut HashSet<K>,
        sorted: &mut Vec<K>,
    ) -> Result<(), TopologyError<K>>
    where
        K: Hash + Eq + Clone + Debug,
    {
        if recursion_stack.contains(&node) {
            return Err(TopologyError::CycleDetected { node });
        }

        if visited.contains(&node) {
            return Ok(());
        }

        recursion_stack.insert(node.clone());

        if let Some(deps) = dependencies.get(&node) {
            for dep in deps {
                visit(dep.clone(), dependencies, visited, recursion_stack, sorted)?;
            }
        }

        recursion_stack.remove(&node);
        visited.insert(node.clone());
        sorted.push(node);

        Ok(())
    }

    for node in &nodes {
        if !visited.contains(node) {
            visit(
                node.clone(),
                &dependencies,
                &mut visited,
                &mut recursion_stack,
                &mut sorted,
            )?;
        }
    }

    Ok(sorted)
}
