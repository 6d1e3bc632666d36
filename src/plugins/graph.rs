//! Dependency graph ordering.

use std::collections::{HashMap, VecDeque};

use super::PluginError;

/// A plugin name and the names it depends on.
pub(crate) type Node<'a> = (&'a str, &'a [String]);

/// Orders `nodes` so every plugin follows its dependencies (Kahn's
/// algorithm). Ties keep input order. Dependencies naming plugins outside
/// `nodes` are ignored; callers check presence separately.
pub(crate) fn topological_order(nodes: &[Node<'_>]) -> Result<Vec<String>, PluginError> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (*name, i))
        .collect();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree = vec![0usize; nodes.len()];

    for (i, (_, deps)) in nodes.iter().enumerate() {
        for dep in deps.iter() {
            if let Some(&d) = index.get(dep.as_str()) {
                dependents[d].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(i) = queue.pop_front() {
        order.push(nodes[i].0.to_string());
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != nodes.len() {
        let mut cycle: Vec<String> = (0..nodes.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| nodes[i].0.to_string())
            .collect();
        cycle.sort();
        return Err(PluginError::CyclicDependency { cycle });
    }

    Ok(order)
}

/// Longest dependency chain below each plugin: 0 for plugins with no
/// dependencies in `nodes`, otherwise one more than the deepest dependency.
pub(crate) fn dependency_ranks(nodes: &[Node<'_>]) -> Result<HashMap<String, usize>, PluginError> {
    let deps: HashMap<&str, &[String]> = nodes.iter().copied().collect();
    let mut ranks: HashMap<String, usize> = HashMap::with_capacity(nodes.len());

    for name in topological_order(nodes)? {
        let rank = deps
            .get(name.as_str())
            .into_iter()
            .flat_map(|d| d.iter())
            .filter_map(|dep| ranks.get(dep.as_str()))
            .map(|r| r + 1)
            .max()
            .unwrap_or(0);
        ranks.insert(name, rank);
    }

    Ok(ranks)
}
