use hoyo_kernel::plugin::{LoadError, PluginDescriptor};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Load order for a batch of plugins plus everything that cannot load.
#[derive(Debug, Default)]
pub struct LoadPlan {
    /// Names in dependency order; ties keep discovery order.
    pub order: Vec<String>,
    pub failures: Vec<LoadError>,
}

impl LoadPlan {
    /// Names of every plugin rejected by the plan.
    pub fn failed_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for failure in &self.failures {
            match failure {
                LoadError::CircularDependency { members } => names.extend(members.iter().cloned()),
                other => {
                    if let Some(name) = other.plugin() {
                        names.insert(name.to_string());
                    }
                }
            }
        }
        names
    }
}

pub struct DependencyGraph {
    /// Plugin names in insertion order.
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    pub fn add_plugin(&mut self, descriptor: &PluginDescriptor) -> Result<(), LoadError> {
        let name = descriptor.name.clone();

        if self.index.contains_key(&name) {
            return Err(LoadError::DuplicatePlugin(name));
        }

        self.index.insert(name.clone(), self.nodes.len());
        self.nodes.push(name.clone());
        self.edges
            .insert(name, descriptor.dependencies.iter().cloned().collect());

        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get_dependencies(&self, name: &str) -> Option<Vec<String>> {
        self.edges.get(name).cloned()
    }

    pub fn get_dependents(&self, name: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|node| self.edges[*node].iter().any(|dep| dep == name))
            .cloned()
            .collect()
    }

    /// Topologically sort the graph.
    ///
    /// Never fails as a whole: missing dependencies, cycles, and plugins
    /// depending on either are reported in [`LoadPlan::failures`] while every
    /// unrelated plugin still gets a place in [`LoadPlan::order`].
    pub fn resolve_load_order(&self) -> LoadPlan {
        let mut plan = LoadPlan::default();
        let mut failed: HashSet<&str> = HashSet::new();

        for name in &self.nodes {
            if let Some(missing) = self.edges[name].iter().find(|dep| !self.contains(dep)) {
                plan.failures.push(LoadError::MissingDependency {
                    plugin: name.clone(),
                    dependency: missing.clone(),
                });
                failed.insert(name);
            }
        }
        self.propagate_failures(&mut failed, &mut plan.failures);

        // Kahn's algorithm; the ready set is ordered by insertion index.
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut ready: BTreeSet<usize> = BTreeSet::new();
        for (idx, name) in self.nodes.iter().enumerate() {
            if failed.contains(name.as_str()) {
                continue;
            }
            let degree = self.edges[name].len();
            in_degree.insert(name, degree);
            if degree == 0 {
                ready.insert(idx);
            }
        }

        while let Some(idx) = ready.pop_first() {
            let name = &self.nodes[idx];
            plan.order.push(name.clone());

            for (other_idx, other) in self.nodes.iter().enumerate() {
                if self.edges[other].contains(name) {
                    if let Some(degree) = in_degree.get_mut(other.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(other_idx);
                        }
                    }
                }
            }
        }

        let placed: HashSet<&str> = plan.order.iter().map(String::as_str).collect();
        let stuck: Vec<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|name| !failed.contains(name) && !placed.contains(name))
            .collect();

        if !stuck.is_empty() {
            let stuck_set: HashSet<&str> = stuck.iter().copied().collect();
            let mut assigned: HashSet<&str> = HashSet::new();

            for &name in &stuck {
                if assigned.contains(name) {
                    continue;
                }
                let reach = self.reachable_from(name, &stuck_set);
                if !reach.contains(name) {
                    continue;
                }
                let members: Vec<&str> = stuck
                    .iter()
                    .copied()
                    .filter(|other| reach.contains(other) && self.reachable_from(other, &stuck_set).contains(name))
                    .collect();
                assigned.extend(members.iter().copied());
                plan.failures.push(LoadError::CircularDependency {
                    members: members.iter().map(|m| m.to_string()).collect(),
                });
            }

            failed.extend(assigned);
            self.propagate_failures(&mut failed, &mut plan.failures);
        }

        plan
    }

    /// Mark every plugin depending on a failed plugin as failed, to a fixpoint.
    fn propagate_failures<'a>(&'a self, failed: &mut HashSet<&'a str>, failures: &mut Vec<LoadError>) {
        loop {
            let mut changed = false;
            for name in &self.nodes {
                if failed.contains(name.as_str()) {
                    continue;
                }
                if let Some(dep) = self.edges[name].iter().find(|dep| failed.contains(dep.as_str())) {
                    failures.push(LoadError::DependencyFailed {
                        plugin: name.clone(),
                        dependency: dep.clone(),
                    });
                    failed.insert(name);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Nodes reachable from `start` in one or more steps, staying inside `within`.
    fn reachable_from<'a>(&'a self, start: &str, within: &HashSet<&str>) -> HashSet<&'a str> {
        let mut seen: HashSet<&'a str> = HashSet::new();
        let mut stack: Vec<&'a str> = self.edges[start]
            .iter()
            .map(String::as_str)
            .filter(|dep| within.contains(dep))
            .collect();

        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            for dep in &self.edges[node] {
                if within.contains(dep.as_str()) && !seen.contains(dep.as_str()) {
                    stack.push(dep);
                }
            }
        }
        seen
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a graph from descriptors in discovery order and resolve it.
///
/// A descriptor whose name was already seen is rejected as a duplicate; the
/// first one wins.
pub fn resolve_load_order(descriptors: &[PluginDescriptor]) -> LoadPlan {
    let mut graph = DependencyGraph::new();
    let mut duplicates = Vec::new();
    for descriptor in descriptors {
        if let Err(err) = graph.add_plugin(descriptor) {
            duplicates.push(err);
        }
    }

    let mut plan = graph.resolve_load_order();
    duplicates.append(&mut plan.failures);
    plan.failures = duplicates;
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(name: &str, deps: &[&str]) -> PluginDescriptor {
        deps.iter().fold(PluginDescriptor::new(name, "1.0.0", name), |d, dep| {
            d.with_dependency(dep)
        })
    }

    #[test]
    fn chain_loads_dependencies_first() {
        let plan = resolve_load_order(&[desc("c", &["b"]), desc("b", &["a"]), desc("a", &[])]);
        assert_eq!(plan.order, vec!["a", "b", "c"]);
        assert!(plan.failures.is_empty());
    }

    #[test]
    fn independent_plugins_keep_discovery_order() {
        let plan = resolve_load_order(&[desc("zeta", &[]), desc("alpha", &[]), desc("mid", &["zeta"])]);
        assert_eq!(plan.order, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn cycle_fails_members_only() {
        let plan = resolve_load_order(&[desc("x", &["y"]), desc("y", &["x"]), desc("z", &[])]);
        assert_eq!(plan.order, vec!["z"]);
        assert_eq!(plan.failures.len(), 1);
        match &plan.failures[0] {
            LoadError::CircularDependency { members } => assert_eq!(members, &vec!["x", "y"]),
            other => panic!("unexpected failure {other:?}"),
        }
        assert_eq!(
            plan.failed_names().into_iter().collect::<Vec<_>>(),
            vec!["x", "y"]
        );
    }

    #[test]
    fn dependents_of_a_cycle_fail_as_dependency_failures() {
        let plan = resolve_load_order(&[
            desc("x", &["y"]),
            desc("y", &["x"]),
            desc("w", &["x"]),
            desc("z", &[]),
        ]);
        assert_eq!(plan.order, vec!["z"]);
        assert!(plan.failures.iter().any(|f| matches!(
            f,
            LoadError::DependencyFailed { plugin, dependency } if plugin == "w" && dependency == "x"
        )));
    }

    #[test]
    fn separate_cycles_are_reported_separately() {
        let plan = resolve_load_order(&[
            desc("a", &["b"]),
            desc("b", &["a"]),
            desc("c", &["d"]),
            desc("d", &["c"]),
        ]);
        assert!(plan.order.is_empty());
        let cycles = plan
            .failures
            .iter()
            .filter(|f| matches!(f, LoadError::CircularDependency { .. }))
            .count();
        assert_eq!(cycles, 2);
    }

    #[test]
    fn missing_dependency_propagates() {
        let plan = resolve_load_order(&[desc("a", &["ghost"]), desc("b", &["a"]), desc("c", &[])]);
        assert_eq!(plan.order, vec!["c"]);
        assert!(matches!(
            &plan.failures[0],
            LoadError::MissingDependency { plugin, dependency } if plugin == "a" && dependency == "ghost"
        ));
        assert!(matches!(
            &plan.failures[1],
            LoadError::DependencyFailed { plugin, .. } if plugin == "b"
        ));
    }

    #[test]
    fn duplicate_names_keep_the_first() {
        let plan = resolve_load_order(&[desc("a", &[]), desc("a", &[]), desc("b", &["a"])]);
        assert_eq!(plan.order, vec!["a", "b"]);
        assert!(matches!(&plan.failures[0], LoadError::DuplicatePlugin(name) if name == "a"));
    }

    #[test]
    fn graph_reports_dependents() {
        let mut graph = DependencyGraph::new();
        graph.add_plugin(&desc("a", &[])).unwrap();
        graph.add_plugin(&desc("b", &["a"])).unwrap();
        graph.add_plugin(&desc("c", &["a"])).unwrap();
        assert_eq!(graph.get_dependents("a"), vec!["b", "c"]);
        assert_eq!(graph.get_dependencies("b"), Some(vec!["a".to_string()]));
        assert!(graph.add_plugin(&desc("a", &[])).is_err());
    }
}
