use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use super::errors::GraphError;
use super::report::GraphReport;
use crate::sync::lock;

/// Everything that transitively depends on a node: what breaks if it goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalImpact {
    pub target: String,
    pub dependents: BTreeSet<String>,
}

impl RemovalImpact {
    pub fn is_safe(&self) -> bool {
        self.dependents.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct GraphState {
    /// Explicitly registered nodes.
    nodes: BTreeSet<String>,
    /// dependent -> dependencies
    forward: HashMap<String, BTreeSet<String>>,
    /// dependency -> dependents
    reverse: HashMap<String, BTreeSet<String>>,
    /// Transitive dependency sets, dropped on every mutation.
    memo: HashMap<String, BTreeSet<String>>,
}

impl GraphState {
    fn known_nodes(&self) -> BTreeSet<String> {
        let mut all = self.nodes.clone();
        all.extend(self.forward.keys().cloned());
        all.extend(self.reverse.keys().cloned());
        all
    }

    fn contains(&self, id: &str) -> bool {
        self.nodes.contains(id) || self.forward.contains_key(id) || self.reverse.contains_key(id)
    }

    fn transitive_dependencies(&mut self, id: &str) -> BTreeSet<String> {
        if let Some(hit) = self.memo.get(id) {
            return hit.clone();
        }
        let closure = walk(&self.forward, id);
        self.memo.insert(id.to_string(), closure.clone());
        closure
    }

    /// Insert an edge after checking it keeps the graph acyclic. Nothing is
    /// mutated when the check fails.
    fn add_edge(&mut self, dependent: &str, dependency: &str) -> Result<bool, GraphError> {
        if dependent == dependency {
            return Err(GraphError::CircularDependency {
                dependent: dependent.to_string(),
                dependency: dependency.to_string(),
                path: vec![dependent.to_string(), dependency.to_string()],
            });
        }
        if self.forward.get(dependent).is_some_and(|deps| deps.contains(dependency)) {
            return Ok(false);
        }
        if self.transitive_dependencies(dependency).contains(dependent) {
            let mut path = vec![dependent.to_string()];
            path.extend(self.path_between(dependency, dependent));
            return Err(GraphError::CircularDependency {
                dependent: dependent.to_string(),
                dependency: dependency.to_string(),
                path,
            });
        }

        self.forward.entry(dependent.to_string()).or_default().insert(dependency.to_string());
        self.reverse.entry(dependency.to_string()).or_default().insert(dependent.to_string());
        self.memo.clear();
        Ok(true)
    }

    fn remove_edge(&mut self, dependent: &str, dependency: &str) -> bool {
        let removed = self.forward.get_mut(dependent).is_some_and(|deps| deps.remove(dependency));
        if removed {
            prune(&mut self.forward, dependent);
            if let Some(dependents) = self.reverse.get_mut(dependency) {
                dependents.remove(dependent);
            }
            prune(&mut self.reverse, dependency);
            self.memo.clear();
        }
        removed
    }

    fn clear_dependencies_of(&mut self, id: &str) {
        if let Some(deps) = self.forward.remove(id) {
            for dep in deps {
                if let Some(dependents) = self.reverse.get_mut(&dep) {
                    dependents.remove(id);
                }
                prune(&mut self.reverse, &dep);
            }
            self.memo.clear();
        }
    }

    /// Shortest path `from -> ... -> to` along dependency edges.
    fn path_between(&self, from: &str, to: &str) -> Vec<String> {
        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        let mut seen = BTreeSet::from([from]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![to.to_string()];
                let mut cursor = to;
                while let Some(prev) = parent.get(cursor) {
                    path.push((*prev).to_string());
                    cursor = *prev;
                }
                path.reverse();
                return path;
            }
            for next in self.forward.get(current).into_iter().flatten() {
                if seen.insert(next.as_str()) {
                    parent.insert(next.as_str(), current);
                    queue.push_back(next.as_str());
                }
            }
        }
        vec![from.to_string(), to.to_string()]
    }

    /// Kahn's algorithm over `subset`, dependencies first. Ties are broken
    /// by node name so the order is stable.
    fn kahn(&self, subset: &BTreeSet<String>) -> Result<Vec<String>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> = subset.iter().map(|n| (n.as_str(), 0)).collect();
        for node in subset {
            let count = self
                .forward
                .get(node)
                .map(|deps| deps.iter().filter(|d| subset.contains(*d)).count())
                .unwrap_or(0);
            in_degree.insert(node.as_str(), count);
        }

        let mut ready: BTreeSet<&str> =
            in_degree.iter().filter(|&(_, &d)| d == 0).map(|(&n, _)| n).collect();
        let mut order = Vec::with_capacity(subset.len());

        while let Some(node) = ready.pop_first() {
            order.push(node.to_string());
            for dependent in self.reverse.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }

        if order.len() != subset.len() {
            let stuck = in_degree
                .into_iter()
                .filter(|&(_, d)| d > 0)
                .map(|(n, _)| n.to_string())
                .collect();
            return Err(GraphError::CycleDetected(stuck));
        }
        Ok(order)
    }
}

fn walk(edges: &HashMap<String, BTreeSet<String>>, start: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        for next in edges.get(current).into_iter().flatten() {
            if seen.insert(next.clone()) {
                queue.push_back(next);
            }
        }
    }
    seen.remove(start);
    seen
}

fn prune(map: &mut HashMap<String, BTreeSet<String>>, key: &str) {
    if map.get(key).is_some_and(BTreeSet::is_empty) {
        map.remove(key);
    }
}

/// Directed "depends on" graph between sections and variables.
///
/// Edges are stored in both directions. Every insertion is checked against
/// the memoized transitive closure before any map is touched, so the graph
/// is always acyclic.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    state: Mutex<GraphState>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Returns false if it was already registered.
    pub fn add_node(&self, id: &str) -> bool {
        lock(&self.state).nodes.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.state).contains(id)
    }

    pub fn is_registered(&self, id: &str) -> bool {
        lock(&self.state).nodes.contains(id)
    }

    /// Record that `dependent` needs `dependency`.
    ///
    /// Fails with [`GraphError::CircularDependency`] when `dependency`
    /// already (transitively) depends on `dependent`.
    pub fn add_dependency(&self, dependent: &str, dependency: &str) -> Result<(), GraphError> {
        let added = lock(&self.state).add_edge(dependent, dependency)?;
        if added {
            debug!(dependent, dependency, "dependency added");
        }
        Ok(())
    }

    /// Insert a batch of edges all-or-nothing.
    pub fn add_dependencies<I, S>(&self, edges: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let mut state = lock(&self.state);
        let mut scratch = state.clone();
        let mut count = 0;
        for (dependent, dependency) in edges {
            if scratch.add_edge(dependent.as_ref(), dependency.as_ref())? {
                count += 1;
            }
        }
        *state = scratch;
        debug!(count, "dependency batch added");
        Ok(())
    }

    /// Swap the direct dependencies of `id` for `dependencies`, keeping the
    /// old edges if the new set would close a cycle.
    pub fn replace_dependencies<I, S>(&self, id: &str, dependencies: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = lock(&self.state);
        let mut scratch = state.clone();
        scratch.clear_dependencies_of(id);
        for dependency in dependencies {
            scratch.add_edge(id, dependency.as_ref())?;
        }
        scratch.memo.clear();
        *state = scratch;
        debug!(id, "dependencies replaced");
        Ok(())
    }

    pub fn remove_dependency(&self, dependent: &str, dependency: &str) -> bool {
        lock(&self.state).remove_edge(dependent, dependency)
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&self, id: &str) -> bool {
        let mut state = lock(&self.state);
        if !state.contains(id) {
            return false;
        }
        state.nodes.remove(id);
        state.clear_dependencies_of(id);
        if let Some(dependents) = state.reverse.remove(id) {
            for dependent in dependents {
                if let Some(deps) = state.forward.get_mut(&dependent) {
                    deps.remove(id);
                }
                prune(&mut state.forward, &dependent);
            }
        }
        state.memo.clear();
        debug!(id, "node removed");
        true
    }

    /// Direct dependencies.
    pub fn dependencies(&self, id: &str) -> BTreeSet<String> {
        lock(&self.state).forward.get(id).cloned().unwrap_or_default()
    }

    /// Direct dependents.
    pub fn dependents(&self, id: &str) -> BTreeSet<String> {
        lock(&self.state).reverse.get(id).cloned().unwrap_or_default()
    }

    /// Everything `id` needs, directly or not. Memoized until the next
    /// mutation.
    pub fn transitive_dependencies(&self, id: &str) -> BTreeSet<String> {
        lock(&self.state).transitive_dependencies(id)
    }

    /// Everything that needs `id`, directly or not.
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        walk(&lock(&self.state).reverse, id)
    }

    pub fn removal_impact(&self, id: &str) -> RemovalImpact {
        RemovalImpact { target: id.to_string(), dependents: self.transitive_dependents(id) }
    }

    /// Every known node, dependencies before dependents.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let state = lock(&self.state);
        let all = state.known_nodes();
        state.kahn(&all)
    }

    /// Order restricted to `targets` and everything they depend on.
    pub fn topological_order_for<S: AsRef<str>>(&self, targets: &[S]) -> Result<Vec<String>, GraphError> {
        let mut state = lock(&self.state);
        let mut subset = BTreeSet::new();
        for target in targets {
            let target = target.as_ref();
            if !state.contains(target) {
                return Err(GraphError::UnknownNode(target.to_string()));
            }
            subset.extend(state.transitive_dependencies(target));
            subset.insert(target.to_string());
        }
        state.kahn(&subset)
    }

    /// Group an order into waves of mutually independent nodes. Each node
    /// lands one wave after the latest of its in-order dependencies.
    pub fn evaluation_waves(&self, order: &[String]) -> Vec<Vec<String>> {
        let state = lock(&self.state);
        let mut level: HashMap<&str, usize> = HashMap::new();
        let mut waves: Vec<Vec<String>> = Vec::new();

        for node in order {
            let wave = state
                .forward
                .get(node)
                .into_iter()
                .flatten()
                .filter_map(|dep| level.get(dep.as_str()).map(|l| l + 1))
                .max()
                .unwrap_or(0);
            level.insert(node.as_str(), wave);
            if waves.len() <= wave {
                waves.resize_with(wave + 1, Vec::new);
            }
            waves[wave].push(node.clone());
        }
        waves
    }

    /// Any cycle currently in the graph, as a closed node path.
    pub fn find_cycle_path(&self) -> Option<Vec<String>> {
        let state = lock(&self.state);
        let all = state.known_nodes();
        let mut done: BTreeSet<&str> = BTreeSet::new();

        for start in &all {
            if done.contains(start.as_str()) {
                continue;
            }
            // iterative DFS keeping the current path on a stack
            let mut path: Vec<&str> = vec![start.as_str()];
            let mut iters = vec![state.forward.get(start.as_str()).into_iter().flatten()];
            while let Some(iter) = iters.last_mut() {
                match iter.next() {
                    Some(next) => {
                        if let Some(pos) = path.iter().position(|n| *n == next.as_str()) {
                            let mut cycle: Vec<String> = path[pos..].iter().map(|n| n.to_string()).collect();
                            cycle.push(next.clone());
                            return Some(cycle);
                        }
                        if done.contains(next.as_str()) {
                            continue;
                        }
                        path.push(next.as_str());
                        iters.push(state.forward.get(next.as_str()).into_iter().flatten());
                    }
                    None => {
                        iters.pop();
                        if let Some(finished) = path.pop() {
                            done.insert(finished);
                        }
                    }
                }
            }
        }
        None
    }

    /// Surface likely authoring mistakes. None of these block sorting.
    pub fn validate_graph(&self) -> GraphReport {
        let state = lock(&self.state);
        let mut report = GraphReport::default();

        for node in &state.nodes {
            if !state.forward.contains_key(node) && !state.reverse.contains_key(node) {
                report.orphaned.insert(node.clone());
            }
        }
        for dependency in state.reverse.keys() {
            if !state.nodes.contains(dependency) {
                report.missing.insert(dependency.clone());
            }
        }
        for missing in &report.missing {
            for dependent in walk(&state.reverse, missing) {
                if state.nodes.contains(&dependent) {
                    report.unreachable.insert(dependent);
                }
            }
        }
        report
    }

    pub fn nodes(&self) -> BTreeSet<String> {
        lock(&self.state).known_nodes()
    }

    pub fn node_count(&self) -> usize {
        lock(&self.state).known_nodes().len()
    }

    pub fn edge_count(&self) -> usize {
        lock(&self.state).forward.values().map(BTreeSet::len).sum()
    }

    pub fn clear(&self) {
        *lock(&self.state) = GraphState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(edges: &[(&str, &str)]) -> DependencyTracker {
        let t = DependencyTracker::new();
        for (a, b) in edges {
            t.add_node(a);
            t.add_node(b);
            t.add_dependency(a, b).unwrap();
        }
        t
    }

    #[test]
    fn test_abc_scenario() {
        let t = tracker(&[("B", "A"), ("C", "B")]);
        t.add_dependency("C", "A").unwrap();

        let err = t.add_dependency("A", "C").unwrap_err();
        let GraphError::CircularDependency { path, .. } = err else { panic!("expected cycle") };
        assert_eq!(path, vec!["A", "C", "A"]);
        // rejected edge left no trace
        assert!(t.dependencies("A").is_empty());
        assert_eq!(t.topological_order().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let t = DependencyTracker::new();
        assert!(matches!(t.add_dependency("X", "X"), Err(GraphError::CircularDependency { .. })));
    }

    #[test]
    fn test_duplicate_edge_is_noop() {
        let t = tracker(&[("B", "A")]);
        t.add_dependency("B", "A").unwrap();
        assert_eq!(t.edge_count(), 1);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let t = tracker(&[("B", "A")]);
        let err = t.add_dependencies([("C", "B"), ("A", "C")]);
        assert!(err.is_err());
        assert!(t.dependencies("C").is_empty());
        assert_eq!(t.edge_count(), 1);
    }

    #[test]
    fn test_replace_dependencies_keeps_old_on_cycle() {
        let t = tracker(&[("B", "A"), ("C", "B")]);
        assert!(t.replace_dependencies("A", ["C"]).is_err());
        assert!(t.dependencies("A").is_empty());

        t.replace_dependencies("C", ["A"]).unwrap();
        assert_eq!(t.dependencies("C"), BTreeSet::from(["A".to_string()]));
        assert!(t.dependents("B").is_empty());
    }

    #[test]
    fn test_transitive_queries_follow_mutations() {
        let t = tracker(&[("B", "A"), ("C", "B")]);
        assert_eq!(t.transitive_dependencies("C").len(), 2);
        t.remove_dependency("C", "B");
        assert!(t.transitive_dependencies("C").is_empty());
        assert_eq!(t.transitive_dependents("A"), BTreeSet::from(["B".to_string()]));
    }

    #[test]
    fn test_removal_impact_is_transitive() {
        let t = tracker(&[("B", "A"), ("C", "B"), ("D", "A"), ("E", "X")]);
        let impact = t.removal_impact("A");
        assert_eq!(impact.dependents, ["B", "C", "D"].into_iter().map(String::from).collect());
        assert!(t.removal_impact("C").is_safe());
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let t = tracker(&[("B", "A"), ("C", "B")]);
        assert!(t.remove_node("B"));
        assert!(t.dependencies("C").is_empty());
        assert!(t.dependents("A").is_empty());
        assert!(!t.remove_node("B"));
    }

    #[test]
    fn test_order_for_subgraph() {
        let t = tracker(&[("B", "A"), ("C", "B"), ("Z", "Y")]);
        assert_eq!(t.topological_order_for(&["B"]).unwrap(), vec!["A", "B"]);
        assert!(matches!(t.topological_order_for(&["nope"]), Err(GraphError::UnknownNode(_))));
    }

    #[test]
    fn test_evaluation_waves() {
        let t = tracker(&[("C", "A"), ("C", "B"), ("D", "C"), ("E", "A")]);
        let order = t.topological_order().unwrap();
        let waves = t.evaluation_waves(&order);
        assert_eq!(waves, vec![vec!["A", "B"], vec!["C", "E"], vec!["D"]]);
    }

    #[test]
    fn test_validate_graph_warnings() {
        let t = DependencyTracker::new();
        t.add_node("lonely");
        t.add_node("uses_ghost");
        t.add_node("downstream");
        t.add_dependency("uses_ghost", "ghost").unwrap();
        t.add_dependency("downstream", "uses_ghost").unwrap();

        let report = t.validate_graph();
        assert_eq!(report.orphaned, BTreeSet::from(["lonely".to_string()]));
        assert_eq!(report.missing, BTreeSet::from(["ghost".to_string()]));
        assert_eq!(
            report.unreachable,
            BTreeSet::from(["downstream".to_string(), "uses_ghost".to_string()])
        );
        assert!(!report.is_clean());
    }

    #[test]
    fn test_no_cycle_path_in_valid_graph() {
        let t = tracker(&[("B", "A"), ("C", "B"), ("C", "A")]);
        assert_eq!(t.find_cycle_path(), None);
    }

    #[test]
    fn test_many_insertions_stay_sortable() {
        let t = DependencyTracker::new();
        let mut accepted = 0;
        // pseudo-random edge stream over 12 nodes
        let mut seed: u64 = 0x2545_f491;
        for _ in 0..300 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let a = format!("n{}", seed % 12);
            let b = format!("n{}", (seed >> 8) % 12);
            if t.add_dependency(&a, &b).is_ok() {
                accepted += 1;
            }
            assert!(t.topological_order().is_ok());
        }
        assert!(accepted > 0);
        assert_eq!(t.find_cycle_path(), None);
    }
}
