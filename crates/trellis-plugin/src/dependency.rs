//! Dependency resolution: cycle detection, load ordering, and version checks.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use semver::{Version, VersionReq};

use crate::error::DependencyError;
use crate::lifecycle::PluginState;
use crate::manifest::model::{DEFAULT_HOOK_PRIORITY, Manifest};

/// One plugin taking part in a batch load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanNode {
    /// Plugin name.
    pub name: String,
    /// Deployment priority; higher loads earlier among independent plugins.
    pub priority: i64,
    /// Position in the deployment document.
    pub sequence: usize,
    /// Names of declared dependencies, optional ones included.
    pub dependencies: Vec<String>,
}

impl PlanNode {
    /// Builds a node from a manifest and its deployment entry's priority.
    pub fn from_manifest(manifest: &Manifest, priority: Option<i64>, sequence: usize) -> Self {
        Self {
            name: manifest.name.clone(),
            priority: priority.unwrap_or(DEFAULT_HOOK_PRIORITY),
            sequence,
            dependencies: manifest
                .dependencies
                .iter()
                .map(|d| d.name.clone())
                .collect(),
        }
    }
}

/// Finds a dependency cycle among `nodes`.
///
/// Only edges between members of the batch are considered; dependencies on
/// plugins outside it are checked at load time instead. The returned path
/// starts and ends with the same plugin.
pub fn find_cycle(nodes: &[PlanNode]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.name.as_str(), i))
        .collect();
    let mut marks = vec![Mark::Unvisited; nodes.len()];

    fn visit(
        at: usize,
        nodes: &[PlanNode],
        index: &HashMap<&str, usize>,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        marks[at] = Mark::InProgress;
        path.push(at);

        for dep in &nodes[at].dependencies {
            let Some(&next) = index.get(dep.as_str()) else {
                continue;
            };
            match marks[next] {
                Mark::InProgress => {
                    let start = path.iter().position(|&p| p == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|&p| nodes[p].name.clone()).collect();
                    cycle.push(nodes[next].name.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, nodes, index, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        path.pop();
        marks[at] = Mark::Done;
        None
    }

    let mut path = Vec::new();
    for start in 0..nodes.len() {
        if marks[start] == Mark::Unvisited {
            if let Some(cycle) = visit(start, nodes, &index, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Orders `nodes` so every plugin follows the batch members it depends on.
///
/// Among plugins whose dependencies are satisfied, higher priority goes
/// first, then earlier declaration. Fails with the cycle when one exists.
pub fn load_order(nodes: &[PlanNode]) -> Result<Vec<String>, DependencyError> {
    if let Some(cycle) = find_cycle(nodes) {
        return Err(DependencyError::Cycle { cycle });
    }

    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.name.as_str(), i))
        .collect();

    let mut pending = vec![0usize; nodes.len()];
    let mut dependents: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, node) in nodes.iter().enumerate() {
        for dep in &node.dependencies {
            if let Some(&d) = index.get(dep.as_str()) {
                pending[i] += 1;
                dependents.entry(d).or_default().push(i);
            }
        }
    }

    let key = |i: usize| (nodes[i].priority, Reverse(nodes[i].sequence), i);
    let mut ready: BinaryHeap<_> = (0..nodes.len())
        .filter(|&i| pending[i] == 0)
        .map(key)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some((_, _, i)) = ready.pop() {
        order.push(nodes[i].name.clone());
        for &next in dependents.get(&i).map(Vec::as_slice).unwrap_or_default() {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.push(key(next));
            }
        }
    }

    Ok(order)
}

/// Checks the host version against the manifest's `framework.version`.
pub fn check_host_version(manifest: &Manifest, host_version: &str) -> Result<(), DependencyError> {
    let mismatch = || DependencyError::HostVersion {
        plugin: manifest.name.clone(),
        required: manifest.framework.version.clone(),
        host: host_version.to_string(),
    };

    let required = VersionReq::parse(&manifest.framework.version).map_err(|_| mismatch())?;
    let host = Version::parse(host_version).map_err(|_| mismatch())?;
    if required.matches(&host) {
        Ok(())
    } else {
        Err(mismatch())
    }
}

/// Checks every dependency of `manifest` against the plugins known to the
/// runtime. `lookup` returns the state and version of a known plugin.
///
/// Required dependencies must be running at a matching version. Optional
/// ones are skipped when absent or not running, but a running optional
/// dependency must still match its constraint.
pub fn check_dependencies<F>(manifest: &Manifest, lookup: F) -> Result<(), DependencyError>
where
    F: Fn(&str) -> Option<(PluginState, String)>,
{
    for dep in &manifest.dependencies {
        let Some((state, version)) = lookup(&dep.name) else {
            if dep.optional {
                continue;
            }
            return Err(DependencyError::Missing {
                plugin: manifest.name.clone(),
                dependency: dep.name.clone(),
            });
        };

        if !state.is_running() {
            if dep.optional {
                continue;
            }
            return Err(DependencyError::NotRunning {
                plugin: manifest.name.clone(),
                dependency: dep.name.clone(),
                state: state.to_string(),
            });
        }

        let satisfied = match (VersionReq::parse(&dep.version), Version::parse(&version)) {
            (Ok(required), Ok(found)) => required.matches(&found),
            _ => false,
        };
        if !satisfied {
            return Err(DependencyError::Incompatible {
                plugin: manifest.name.clone(),
                dependency: dep.name.clone(),
                required: dep.version.clone(),
                found: version,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::model::{DependencySpec, FrameworkRequirement};

    fn node(name: &str, priority: i64, sequence: usize, deps: &[&str]) -> PlanNode {
        PlanNode {
            name: name.into(),
            priority,
            sequence,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn manifest_with(deps: Vec<DependencySpec>) -> Manifest {
        Manifest {
            name: "reports".into(),
            version: "1.0.0".into(),
            framework: FrameworkRequirement {
                version: ">=0.1.0, <2.0.0".into(),
            },
            dependencies: deps,
            ..Default::default()
        }
    }

    fn dep(name: &str, version: &str, optional: bool) -> DependencySpec {
        DependencySpec {
            name: name.into(),
            version: version.into(),
            optional,
        }
    }

    #[test]
    fn test_dependency_precedes_priority() {
        let nodes = vec![
            node("b", 900, 0, &["a"]),
            node("a", 10, 1, &[]),
            node("c", 500, 2, &[]),
        ];
        assert_eq!(load_order(&nodes).unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_equal_priority_keeps_declaration_order() {
        let nodes = vec![
            node("x", 100, 0, &[]),
            node("y", 100, 1, &[]),
            node("z", 200, 2, &[]),
        ];
        assert_eq!(load_order(&nodes).unwrap(), vec!["z", "x", "y"]);
    }

    #[test]
    fn test_cycle_is_named() {
        let nodes = vec![
            node("a", 100, 0, &["b"]),
            node("b", 100, 1, &["c"]),
            node("c", 100, 2, &["a"]),
            node("d", 100, 3, &[]),
        ];
        match load_order(&nodes).unwrap_err() {
            DependencyError::Cycle { cycle } => assert_eq!(cycle, vec!["a", "b", "c", "a"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_external_dependencies_ignored_for_ordering() {
        let nodes = vec![node("a", 100, 0, &["host-auth"])];
        assert!(find_cycle(&nodes).is_none());
        assert_eq!(load_order(&nodes).unwrap(), vec!["a"]);
    }

    #[test]
    fn test_host_version() {
        let manifest = manifest_with(vec![]);
        assert!(check_host_version(&manifest, "1.4.0").is_ok());
        assert!(matches!(
            check_host_version(&manifest, "2.0.0"),
            Err(DependencyError::HostVersion { .. })
        ));
    }

    #[test]
    fn test_dependency_checks() {
        let manifest = manifest_with(vec![dep("auth", "^1.2", false), dep("metrics", "*", true)]);

        let missing = check_dependencies(&manifest, |_| None).unwrap_err();
        assert!(matches!(missing, DependencyError::Missing { ref dependency, .. } if dependency == "auth"));

        let stopped = check_dependencies(&manifest, |name| {
            (name == "auth").then(|| (PluginState::Stopped, "1.3.0".to_string()))
        })
        .unwrap_err();
        assert!(matches!(stopped, DependencyError::NotRunning { .. }));

        let old = check_dependencies(&manifest, |name| {
            (name == "auth").then(|| (PluginState::Running, "1.1.9".to_string()))
        })
        .unwrap_err();
        assert!(matches!(old, DependencyError::Incompatible { ref found, .. } if found == "1.1.9"));

        assert!(check_dependencies(&manifest, |name| {
            (name == "auth").then(|| (PluginState::Running, "1.4.2".to_string()))
        })
        .is_ok());
    }
}
