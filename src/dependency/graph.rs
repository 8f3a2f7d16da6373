use super::expand_target;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::registry::DependencyKind;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Static dependency graph over the configured services.
///
/// Only edges whose target is itself configured are kept; targets that are
/// missing or only match through a pattern are reported by
/// [`Graph::from_config`] as dangling.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeSet<String>,
    /// `edges[A] = [B, C]` means A depends on B and C
    edges: BTreeMap<String, Vec<String>>,
    /// `reverse[A] = [B, C]` means B and C depend on A
    reverse: BTreeMap<String, Vec<String>>,
}

/// A dependency whose target is not configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingDependency {
    pub service: String,
    pub kind: DependencyKind,
    pub target: String,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from every service definition, expanding template
    /// variables in the targets.
    pub fn from_config(config: &Config) -> (Self, Vec<DanglingDependency>) {
        let mut graph = Self::new();
        let mut dangling = Vec::new();

        for (name, definition) in &config.services {
            graph.add_node(name);
            for dependency in definition.dependencies() {
                let target = expand_target(&dependency.target, name);
                if config.services.contains_key(&target) {
                    graph.add_edge(name, &target);
                } else {
                    dangling.push(DanglingDependency {
                        service: name.clone(),
                        kind: dependency.kind,
                        target,
                    });
                }
            }
        }
        (graph, dangling)
    }

    pub fn add_node(&mut self, name: &str) {
        if self.nodes.insert(name.to_string()) {
            self.edges.entry(name.to_string()).or_default();
            self.reverse.entry(name.to_string()).or_default();
        }
    }

    /// Add a dependency edge (`from` depends on `to`)
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(from);
        self.add_node(to);

        let deps = self.edges.entry(from.to_string()).or_default();
        if !deps.iter().any(|d| d == to) {
            deps.push(to.to_string());
            self.reverse
                .entry(to.to_string())
                .or_default()
                .push(from.to_string());
        }
    }

    /// Direct dependencies of a node
    pub fn dependencies_of(&self, node: &str) -> &[String] {
        self.edges.get(node).map_or(&[], Vec::as_slice)
    }

    /// Nodes that depend on the given node
    pub fn dependents_of(&self, node: &str) -> &[String] {
        self.reverse.get(node).map_or(&[], Vec::as_slice)
    }

    /// Start order: every service after all of its dependencies. Ties are
    /// broken alphabetically so the output is stable.
    pub fn start_order(&self) -> Result<Vec<String>> {
        let mut pending: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|node| (node.as_str(), self.dependencies_of(node).len()))
            .collect();

        let mut ready: VecDeque<&str> = pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = ready.pop_front() {
            order.push(node.to_string());
            for dependent in self.dependents_of(node) {
                if let Some(count) = pending.get_mut(dependent.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(Error::CircularDependency(self.find_cycle()));
        }
        Ok(order)
    }

    /// Groups of services that may start together: each wave only depends
    /// on earlier waves.
    pub fn start_waves(&self) -> Result<Vec<Vec<String>>> {
        let order = self.start_order()?;
        let mut wave_of: BTreeMap<&str, usize> = BTreeMap::new();
        let mut waves: Vec<Vec<String>> = Vec::new();

        for node in &order {
            let wave = self
                .dependencies_of(node)
                .iter()
                .filter_map(|dep| wave_of.get(dep.as_str()))
                .map(|w| w + 1)
                .max()
                .unwrap_or(0);
            wave_of.insert(node, wave);
            if waves.len() <= wave {
                waves.resize_with(wave + 1, Vec::new);
            }
            waves[wave].push(node.clone());
        }
        Ok(waves)
    }

    pub fn has_cycle(&self) -> bool {
        self.start_order().is_err()
    }

    /// A cycle as a closed path (`a -> b -> a`), empty if there is none.
    pub fn find_cycle(&self) -> Vec<String> {
        let mut visited = BTreeSet::new();
        let mut on_path = BTreeSet::new();
        let mut path = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node.as_str()) {
                if let Some(cycle) = self.cycle_from(node, &mut visited, &mut on_path, &mut path) {
                    return cycle;
                }
            }
        }
        Vec::new()
    }

    fn cycle_from<'a>(
        &'a self,
        node: &'a str,
        visited: &mut BTreeSet<&'a str>,
        on_path: &mut BTreeSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        on_path.insert(node);
        path.push(node);

        for dep in self.dependencies_of(node) {
            if on_path.contains(dep.as_str()) {
                let start = path.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(dep.clone());
                return Some(cycle);
            }
            if !visited.contains(dep.as_str()) {
                if let Some(cycle) = self.cycle_from(dep, visited, on_path, path) {
                    return Some(cycle);
                }
            }
        }

        on_path.remove(node);
        path.pop();
        None
    }

    pub fn nodes(&self) -> &BTreeSet<String> {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parser;

    #[test]
    fn test_start_order() {
        let mut graph = Graph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");

        let sorted = graph.start_order().unwrap();
        assert_eq!(sorted, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_circular_dependency_path() {
        let mut graph = Graph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "a");

        assert!(graph.has_cycle());
        match graph.start_order() {
            Err(Error::CircularDependency(path)) => {
                assert_eq!(path, vec!["a", "b", "a"]);
            }
            other => panic!("expected a cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_start_waves() {
        let mut graph = Graph::new();
        graph.add_node("a");
        graph.add_node("b");
        graph.add_edge("c", "a");
        graph.add_edge("c", "b");
        graph.add_edge("d", "c");

        let waves = graph.start_waves().unwrap();
        assert_eq!(waves, vec![vec!["a", "b"], vec!["c"], vec!["d"]]);
    }

    #[test]
    fn test_from_config_expands_templates_and_reports_dangling() {
        let config = Parser::new()
            .parse_config(
                r#"
services:
  mount/home:
    type: service
    need: [fsck/$NAME]
    use: [syslog]
  fsck/home:
    type: service
"#,
            )
            .unwrap();

        let (graph, dangling) = Graph::from_config(&config);
        assert_eq!(graph.dependencies_of("mount/home"), ["fsck/home"]);
        assert_eq!(
            dangling,
            vec![DanglingDependency {
                service: "mount/home".into(),
                kind: DependencyKind::Use,
                target: "syslog".into(),
            }]
        );
    }
}
