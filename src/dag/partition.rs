//! Layered execution order.
//!
//! A modified Kahn's algorithm over "units": every ungrouped step is its own
//! unit and each parallel group collapses into one. A unit becomes ready when
//! all of its `after` dependencies sit in earlier partitions and, for each
//! member with `after_any`, at least one of those dependencies does.

use super::graph::DagNode;
use super::DagError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Steps that may run concurrently, in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub index: usize,
    pub steps: Vec<String>,
}

impl Partition {
    pub fn contains(&self, step: &str) -> bool {
        self.steps.iter().any(|s| s == step)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

struct Unit {
    label: String,
    members: Vec<usize>,
    required: BTreeSet<usize>,
    any_of: Vec<BTreeSet<usize>>,
}

pub(crate) fn partition(
    nodes: &[DagNode],
    index: &HashMap<String, usize>,
) -> Result<Vec<Partition>, DagError> {
    let (mut units, unit_of) = collapse(nodes);

    for unit_id in 0..units.len() {
        let members = units[unit_id].members.clone();
        for member in members {
            let node = &nodes[member];
            for dep in &node.after {
                let dep_unit = unit_of[index[dep.as_str()]];
                if dep_unit != unit_id {
                    units[unit_id].required.insert(dep_unit);
                }
            }
            if !node.after_any.is_empty() {
                let set: BTreeSet<usize> = node
                    .after_any
                    .iter()
                    .map(|dep| unit_of[index[dep.as_str()]])
                    .filter(|&u| u != unit_id)
                    .collect();
                if !set.is_empty() {
                    units[unit_id].any_of.push(set);
                }
            }
        }
    }

    let mut placed = vec![false; units.len()];
    let mut remaining = units.len();
    let mut partitions = Vec::new();

    while remaining > 0 {
        let ready: Vec<usize> = (0..units.len())
            .filter(|&u| !placed[u])
            .filter(|&u| {
                let unit = &units[u];
                unit.required.iter().all(|&d| placed[d])
                    && unit.any_of.iter().all(|set| set.iter().any(|&d| placed[d]))
            })
            .collect();

        if ready.is_empty() {
            let path = (0..units.len())
                .filter(|&u| !placed[u])
                .map(|u| units[u].label.clone())
                .collect();
            return Err(DagError::Cycle { path });
        }

        let mut members: Vec<usize> = ready
            .iter()
            .flat_map(|&u| units[u].members.iter().copied())
            .collect();
        members.sort_unstable();

        for &u in &ready {
            placed[u] = true;
        }
        remaining -= ready.len();

        partitions.push(Partition {
            index: partitions.len(),
            steps: members.into_iter().map(|i| nodes[i].name.clone()).collect(),
        });
    }

    Ok(partitions)
}

/// Collapse groups into units ordered by their first declared member
fn collapse(nodes: &[DagNode]) -> (Vec<Unit>, Vec<usize>) {
    let mut units: Vec<Unit> = Vec::new();
    let mut by_group: HashMap<&str, usize> = HashMap::new();
    let mut unit_of = Vec::with_capacity(nodes.len());

    for (i, node) in nodes.iter().enumerate() {
        let unit_id = match node.group.as_deref() {
            Some(group) => *by_group.entry(group).or_insert_with(|| {
                units.push(Unit {
                    label: format!("group:{group}"),
                    members: Vec::new(),
                    required: BTreeSet::new(),
                    any_of: Vec::new(),
                });
                units.len() - 1
            }),
            None => {
                units.push(Unit {
                    label: node.name.clone(),
                    members: Vec::new(),
                    required: BTreeSet::new(),
                    any_of: Vec::new(),
                });
                units.len() - 1
            }
        };
        units[unit_id].members.push(i);
        unit_of.push(unit_id);
    }

    (units, unit_of)
}
