use std::collections::{BTreeMap, HashSet};

use thiserror::Error;

use crate::types::RecordId;

/// One row of the manager relation: `(employee, manager)`.
pub type ManagerEdge = (RecordId, Option<RecordId>);

/// Errors raised while expanding a reporting tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
    #[error("manager cycle detected at employee {employee_id}")]
    Cycle { employee_id: RecordId },
}

/// Child lists of the manager relation, built once per walk.
#[derive(Debug, Default)]
pub struct ReportingTree {
    children: BTreeMap<RecordId, Vec<RecordId>>,
}

impl ReportingTree {
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = ManagerEdge>,
    {
        let mut children: BTreeMap<RecordId, Vec<RecordId>> = BTreeMap::new();
        for (employee_id, manager_id) in edges {
            if let Some(manager_id) = manager_id {
                children.entry(manager_id).or_default().push(employee_id);
            }
        }
        for reports in children.values_mut() {
            reports.sort_unstable();
        }
        Self { children }
    }

    /// Direct reports of `manager_id`, ascending by id.
    pub fn direct_reports(&self, manager_id: RecordId) -> &[RecordId] {
        self.children
            .get(&manager_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns every transitive report of `root` in pre-order.
    ///
    /// A node is listed before its own reports; siblings are visited in ascending id order.
    /// Reaching an already visited node (the root included) means the manager relation contains
    /// a cycle, which is reported instead of looping.
    pub fn walk(&self, root: RecordId) -> Result<Vec<RecordId>, HierarchyError> {
        let mut visited = HashSet::from([root]);
        let mut ordered = Vec::new();
        let mut stack: Vec<RecordId> = self.direct_reports(root).iter().rev().copied().collect();

        while let Some(employee_id) = stack.pop() {
            if !visited.insert(employee_id) {
                return Err(HierarchyError::Cycle { employee_id });
            }
            ordered.push(employee_id);
            stack.extend(self.direct_reports(employee_id).iter().rev().copied());
        }

        Ok(ordered)
    }
}
