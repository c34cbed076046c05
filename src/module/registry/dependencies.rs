//! Module dependency resolution
//!
//! Computes the transitive closure of enabled modules and a deterministic
//! activation order (dependencies first) using Kahn's algorithm. Among modules
//! that are ready at the same time the lexicographically smallest id goes first,
//! so the same enabled set always yields the same order.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::module::error::OrchestratorError;
use crate::module::traits::ModuleDescriptor;

/// Dependency resolution result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyResolution {
    /// Modules in activation order (dependencies first)
    pub activation_order: Vec<String>,
    /// Modules pulled in only because an enabled module depends on them
    pub auto_enabled: Vec<String>,
    /// Dependency edges of every module in the order
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
}

/// Dependency graph over registered module descriptors
///
/// Built fresh for each resolution pass and never cached.
pub struct DependencyGraph<'a> {
    descriptors: &'a BTreeMap<String, ModuleDescriptor>,
}

impl<'a> DependencyGraph<'a> {
    pub fn new(descriptors: &'a BTreeMap<String, ModuleDescriptor>) -> Self {
        Self { descriptors }
    }

    /// Resolve the activation order for `enabled`
    ///
    /// Fails on unknown dependency targets and on cycles without producing a
    /// partial order.
    pub fn resolve(
        &self,
        enabled: &BTreeSet<String>,
    ) -> Result<DependencyResolution, OrchestratorError> {
        let closure = self.closure(enabled)?;

        let dependencies: BTreeMap<String, BTreeSet<String>> = closure
            .iter()
            .map(|id| (id.clone(), self.descriptors[id].dependencies.clone()))
            .collect();

        let activation_order = Self::topological_sort(&dependencies)
            .map_err(|residual| OrchestratorError::DependencyCycle {
                cycle: Self::find_cycle(&dependencies, &residual),
            })?;

        let auto_enabled = closure.difference(enabled).cloned().collect();

        debug!("Dependency resolution complete: {:?}", activation_order);

        Ok(DependencyResolution {
            activation_order,
            auto_enabled,
            dependencies,
        })
    }

    /// Every module transitively required by `enabled`, including `enabled`
    fn closure(&self, enabled: &BTreeSet<String>) -> Result<BTreeSet<String>, OrchestratorError> {
        let descriptors: &'a BTreeMap<String, ModuleDescriptor> = self.descriptors;
        let mut visited = BTreeSet::new();

        for id in enabled {
            let Some((root, _)) = descriptors.get_key_value(id) else {
                return Err(OrchestratorError::ModuleNotFound(id.clone()));
            };
            self.visit(root, &mut visited)?;
        }

        Ok(visited)
    }

    /// Depth-first walk from `root` with an explicit path stack
    ///
    /// Each frame holds a module and the index of its next dependency to walk.
    /// A module is marked visited once all of its dependencies are.
    fn visit(
        &self,
        root: &'a str,
        visited: &mut BTreeSet<String>,
    ) -> Result<(), OrchestratorError> {
        let descriptors: &'a BTreeMap<String, ModuleDescriptor> = self.descriptors;
        if visited.contains(root) {
            return Ok(());
        }

        let mut path: Vec<(&'a str, usize)> = vec![(root, 0)];
        while let Some(&(id, next)) = path.last() {
            let Some(dep) = descriptors[id].dependencies.iter().nth(next) else {
                path.pop();
                visited.insert(id.to_string());
                continue;
            };
            if let Some(frame) = path.last_mut() {
                frame.1 += 1;
            }

            if !descriptors.contains_key(dep) {
                return Err(OrchestratorError::UnresolvedDependency {
                    module: id.to_string(),
                    missing: dep.clone(),
                });
            }
            if visited.contains(dep) {
                continue;
            }
            if let Some(pos) = path.iter().position(|(p, _)| *p == dep.as_str()) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|(p, _)| p.to_string()).collect();
                cycle.push(dep.clone());
                return Err(OrchestratorError::DependencyCycle { cycle });
            }
            path.push((dep.as_str(), 0));
        }

        Ok(())
    }

    /// Kahn's algorithm with an ordered ready set
    ///
    /// On failure returns the nodes that could not be placed.
    fn topological_sort(
        dependencies: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<Vec<String>, BTreeSet<String>> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (module, deps) in dependencies {
            in_degree.insert(module, deps.len());
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(module);
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(module, _)| *module)
            .collect();

        let mut result = Vec::with_capacity(dependencies.len());

        while let Some(module) = ready.pop_first() {
            result.push(module.to_string());

            for dependent in dependents.get(module).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if result.len() != dependencies.len() {
            let placed: BTreeSet<&str> = result.iter().map(String::as_str).collect();
            return Err(in_degree
                .keys()
                .filter(|m| !placed.contains(*m))
                .map(|m| m.to_string())
                .collect());
        }

        Ok(result)
    }

    /// Extract one concrete cycle from the nodes Kahn's algorithm left behind
    ///
    /// Every residual node has at least one residual dependency, so following
    /// them from the smallest id must revisit a node.
    fn find_cycle(
        dependencies: &BTreeMap<String, BTreeSet<String>>,
        residual: &BTreeSet<String>,
    ) -> Vec<String> {
        let Some(start) = residual.iter().next() else {
            return Vec::new();
        };

        let mut path: Vec<String> = Vec::new();
        let mut current = start.clone();

        loop {
            if let Some(pos) = path.iter().position(|p| *p == current) {
                let mut cycle = path.split_off(pos);
                cycle.push(current);
                return cycle;
            }
            path.push(current.clone());

            let next = dependencies
                .get(&current)
                .and_then(|deps| deps.iter().find(|d| residual.contains(*d)));
            match next {
                Some(next) => current = next.clone(),
                None => return residual.iter().cloned().collect(),
            }
        }
    }

    /// Modules that depend on `id`, directly or transitively
    pub fn dependents_of(&self, id: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![id.to_string()];

        while let Some(current) = frontier.pop() {
            for (candidate, descriptor) in self.descriptors {
                if descriptor.dependencies.contains(&current) && found.insert(candidate.clone()) {
                    frontier.push(candidate.clone());
                }
            }
        }

        found
    }
}
