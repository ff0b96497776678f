//! Graph construction and validation.
//!
//! Validation order: duplicate names, unknown references, then cycle
//! detection by depth-first traversal with visiting/visited coloring. Group
//! membership is validated last since it needs a sound graph.

use super::partition::{partition, Partition};
use super::DagError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One step's position in the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNode {
    pub name: String,
    /// All must complete first
    #[serde(default)]
    pub after: Vec<String>,
    /// First to complete wins
    #[serde(default)]
    pub after_any: Vec<String>,
    /// Parallel-group tag; members always share a partition
    #[serde(default)]
    pub group: Option<String>,
}

impl DagNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            after: Vec::new(),
            after_any: Vec::new(),
            group: None,
        }
    }

    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn after_any<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after_any.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Every referenced dependency, `after` first
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.after
            .iter()
            .chain(self.after_any.iter())
            .map(String::as_str)
    }
}

/// Validated, immutable dependency graph with its precomputed execution order
#[derive(Debug, Clone)]
pub struct Dag {
    nodes: Vec<DagNode>,
    index: HashMap<String, usize>,
    partitions: Vec<Partition>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    Visiting,
    Visited,
}

impl Dag {
    /// Build and validate a graph from nodes in declaration order
    pub fn build(nodes: Vec<DagNode>) -> Result<Self, DagError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.name.clone(), i).is_some() {
                return Err(DagError::DuplicateStep(node.name.clone()));
            }
        }

        for node in &nodes {
            for dep in node.dependencies() {
                if !index.contains_key(dep) {
                    return Err(DagError::UnknownDependency {
                        step: node.name.clone(),
                        dependency: dep.to_string(),
                    });
                }
            }
        }

        detect_cycle(&nodes, &index)?;
        validate_groups(&nodes)?;

        let partitions = partition(&nodes, &index)?;

        Ok(Self {
            nodes,
            index,
            partitions,
        })
    }

    /// Partitions in execution order
    pub fn execution_order(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn nodes(&self) -> &[DagNode] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&DagNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Declaration position, used for deterministic merge order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn partition_of(&self, name: &str) -> Option<usize> {
        self.partitions
            .iter()
            .position(|p| p.steps.iter().any(|s| s == name))
    }

    /// Steps that declare `name` as a dependency
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.dependencies().any(|d| d == name))
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Transitive closure of dependents, in declaration order
    pub fn downstream(&self, name: &str) -> Vec<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack = vec![name];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents(current) {
                if seen.insert(dependent) {
                    stack.push(dependent);
                }
            }
        }
        self.nodes
            .iter()
            .map(|n| n.name.as_str())
            .filter(|n| seen.contains(n))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn detect_cycle(nodes: &[DagNode], index: &HashMap<String, usize>) -> Result<(), DagError> {
    let mut colors = vec![Color::Unvisited; nodes.len()];
    let mut path: Vec<usize> = Vec::new();

    for start in 0..nodes.len() {
        if colors[start] == Color::Unvisited {
            visit(start, nodes, index, &mut colors, &mut path)?;
        }
    }
    Ok(())
}

fn visit(
    current: usize,
    nodes: &[DagNode],
    index: &HashMap<String, usize>,
    colors: &mut [Color],
    path: &mut Vec<usize>,
) -> Result<(), DagError> {
    colors[current] = Color::Visiting;
    path.push(current);

    for dep in nodes[current].dependencies() {
        let next = index[dep];
        match colors[next] {
            Color::Visiting => {
                let start = path.iter().position(|&i| i == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..]
                    .iter()
                    .map(|&i| nodes[i].name.clone())
                    .collect();
                cycle.push(nodes[next].name.clone());
                // path follows dependency edges backwards; report in execution direction
                cycle.reverse();
                return Err(DagError::Cycle { path: cycle });
            }
            Color::Unvisited => visit(next, nodes, index, colors, path)?,
            Color::Visited => {}
        }
    }

    path.pop();
    colors[current] = Color::Visited;
    Ok(())
}

fn validate_groups(nodes: &[DagNode]) -> Result<(), DagError> {
    let groups: HashMap<&str, &str> = nodes
        .iter()
        .filter_map(|n| n.group.as_deref().map(|g| (n.name.as_str(), g)))
        .collect();

    for node in nodes {
        let Some(group) = node.group.as_deref() else {
            continue;
        };
        for dep in node.dependencies() {
            if groups.get(dep) == Some(&group) {
                return Err(DagError::GroupDependency {
                    group: group.to_string(),
                    step: node.name.clone(),
                    dependency: dep.to_string(),
                });
            }
        }
    }
    Ok(())
}
