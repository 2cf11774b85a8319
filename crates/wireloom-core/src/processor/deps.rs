//! Object graph construction: init/open dependency DAGs, depth computation,
//! and cycle detection (§4.5 steps 1-2).

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct DepSpec {
    pub init_deps: Vec<String>,
    pub open_deps: Vec<String>,
}

/// Computes a DFS-based topological depth for every node in `deps`, failing
/// with the cycle path if one exists. Depth 0 means "no dependencies".
pub fn compute_depth(deps: &HashMap<String, Vec<String>>) -> Result<HashMap<String, u32>> {
    let mut depth = HashMap::new();
    let mut visiting = HashSet::new();
    let mut stack = Vec::new();

    for name in deps.keys() {
        visit(name, deps, &mut depth, &mut visiting, &mut stack)?;
    }
    Ok(depth)
}

fn visit(
    name: &str,
    deps: &HashMap<String, Vec<String>>,
    depth: &mut HashMap<String, u32>,
    visiting: &mut HashSet<String>,
    stack: &mut Vec<String>,
) -> Result<u32> {
    if let Some(&d) = depth.get(name) {
        return Ok(d);
    }
    if visiting.contains(name) {
        stack.push(name.to_string());
        let cycle_start = stack.iter().position(|n| n == name).unwrap_or(0);
        return Err(Error::DependencyCycle(stack[cycle_start..].to_vec()));
    }
    visiting.insert(name.to_string());
    stack.push(name.to_string());

    let my_deps = deps.get(name).cloned().unwrap_or_default();
    let mut max_dep_depth: i64 = -1;
    for dep in &my_deps {
        if !deps.contains_key(dep) {
            return Err(Error::UnknownChannel(dep.clone()));
        }
        let d = visit(dep, deps, depth, visiting, stack)?;
        max_dep_depth = max_dep_depth.max(d as i64);
    }

    stack.pop();
    visiting.remove(name);
    let my_depth = (max_dep_depth + 1) as u32;
    depth.insert(name.to_string(), my_depth);
    Ok(my_depth)
}

/// Orders names by ascending depth (instantiation order, §4.5 step 3);
/// within a depth, preserves the input iteration order for determinism.
pub fn order_by_depth(names: &[String], depth: &HashMap<String, u32>) -> Vec<String> {
    let mut ordered: Vec<String> = names.to_vec();
    ordered.sort_by_key(|n| depth.get(n).copied().unwrap_or(0));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn depths_follow_dependency_chain() {
        let deps = m(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        let depth = compute_depth(&deps).unwrap();
        assert_eq!(depth["a"], 0);
        assert_eq!(depth["b"], 1);
        assert_eq!(depth["c"], 2);
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let deps = m(&[("a", &["b"]), ("b", &["a"])]);
        let err = compute_depth(&deps).unwrap_err();
        match err {
            Error::DependencyCycle(path) => assert!(path.contains(&"a".to_string())),
            other => panic!("expected DependencyCycle, got {other:?}"),
        }
    }

    #[test]
    fn missing_dependency_is_an_error() {
        let deps = m(&[("a", &["ghost"])]);
        assert!(matches!(compute_depth(&deps), Err(Error::UnknownChannel(_))));
    }
}
