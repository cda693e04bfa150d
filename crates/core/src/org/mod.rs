//! Escalation hierarchy. Units are appended with their parent fixed at
//! creation; re-parenting is supported but always checked for cycles first.
//! Only one unit may be parentless.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::domain::unit::{OrganizationalUnit, UnitId};
use crate::domain::user::UserId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("organizational unit `{0}` does not exist")]
    UnknownUnit(UnitId),
    #[error("organizational unit `{0}` already exists")]
    DuplicateUnit(UnitId),
    #[error("unit `{unit}` references missing parent `{parent}`")]
    UnknownParent { unit: UnitId, parent: UnitId },
    #[error("moving `{unit}` under `{parent}` would create a cycle")]
    Cycle { unit: UnitId, parent: UnitId },
    #[error("unit `{unit}` cannot become a root while `{root}` is the root")]
    SecondRoot { unit: UnitId, root: UnitId },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrgTree {
    units: BTreeMap<UnitId, OrganizationalUnit>,
}

impl OrgTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a tree from stored units in any order, rejecting dangling
    /// parents and cycles.
    pub fn from_units<I>(units: I) -> Result<Self, TreeError>
    where
        I: IntoIterator<Item = OrganizationalUnit>,
    {
        let mut tree = Self::new();
        for unit in units {
            if tree.units.contains_key(&unit.id) {
                return Err(TreeError::DuplicateUnit(unit.id));
            }
            tree.units.insert(unit.id.clone(), unit);
        }

        for unit in tree.units.values() {
            if let Some(parent) = &unit.parent_id {
                if !tree.units.contains_key(parent) {
                    return Err(TreeError::UnknownParent {
                        unit: unit.id.clone(),
                        parent: parent.clone(),
                    });
                }
            }
            if tree.walk_reaches_root(&unit.id).is_none() {
                return Err(TreeError::Cycle {
                    unit: unit.id.clone(),
                    parent: unit.parent_id.clone().unwrap_or_else(|| unit.id.clone()),
                });
            }
        }

        Ok(tree)
    }

    pub fn add_unit(&mut self, unit: OrganizationalUnit) -> Result<(), TreeError> {
        if self.units.contains_key(&unit.id) {
            return Err(TreeError::DuplicateUnit(unit.id));
        }
        if let Some(parent) = &unit.parent_id {
            if !self.units.contains_key(parent) {
                return Err(TreeError::UnknownParent { unit: unit.id, parent: parent.clone() });
            }
        } else if let Some(root) = self.root_other_than(&unit.id) {
            return Err(TreeError::SecondRoot { unit: unit.id, root: root.clone() });
        }
        self.units.insert(unit.id.clone(), unit);
        Ok(())
    }

    pub fn get(&self, id: &UnitId) -> Option<&OrganizationalUnit> {
        self.units.get(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&OrganizationalUnit> {
        self.units.values().find(|unit| unit.name == name)
    }

    pub fn units(&self) -> impl Iterator<Item = &OrganizationalUnit> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get_parent(&self, id: &UnitId) -> Option<&OrganizationalUnit> {
        self.units.get(id)?.parent_id.as_ref().and_then(|parent| self.units.get(parent))
    }

    pub fn get_manager(&self, id: &UnitId) -> Option<&UserId> {
        self.units.get(id)?.manager_id.as_ref()
    }

    pub fn is_root(&self, id: &UnitId) -> bool {
        self.get_parent(id).is_none()
    }

    /// The first parentless unit other than `id`, if any.
    pub fn root_other_than(&self, id: &UnitId) -> Option<&UnitId> {
        self.units
            .values()
            .find(|unit| unit.parent_id.is_none() && &unit.id != id)
            .map(|unit| &unit.id)
    }

    pub fn children(&self, id: &UnitId) -> Vec<&OrganizationalUnit> {
        self.units.values().filter(|unit| unit.parent_id.as_ref() == Some(id)).collect()
    }

    /// Overwrites any existing manager and returns the previous one. Role
    /// checks on `manager` are left to the caller.
    pub fn assign_manager(
        &mut self,
        id: &UnitId,
        manager: &UserId,
    ) -> Result<Option<UserId>, TreeError> {
        let unit = self.units.get_mut(id).ok_or_else(|| TreeError::UnknownUnit(id.clone()))?;
        Ok(unit.manager_id.replace(manager.clone()))
    }

    pub fn reparent(&mut self, id: &UnitId, parent: Option<&UnitId>) -> Result<(), TreeError> {
        if !self.units.contains_key(id) {
            return Err(TreeError::UnknownUnit(id.clone()));
        }

        if let Some(parent) = parent {
            if !self.units.contains_key(parent) {
                return Err(TreeError::UnknownParent { unit: id.clone(), parent: parent.clone() });
            }
            if self.is_ancestor_or_self(id, parent) {
                return Err(TreeError::Cycle { unit: id.clone(), parent: parent.clone() });
            }
        } else if let Some(root) = self.root_other_than(id) {
            return Err(TreeError::SecondRoot { unit: id.clone(), root: root.clone() });
        }

        if let Some(unit) = self.units.get_mut(id) {
            unit.parent_id = parent.cloned();
        }
        Ok(())
    }

    /// Parents of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: &UnitId) -> Vec<&OrganizationalUnit> {
        let mut chain = Vec::new();
        let mut cursor = self.get_parent(id);
        while let Some(unit) = cursor {
            if chain.len() > self.units.len() {
                break;
            }
            chain.push(unit);
            cursor = self.get_parent(&unit.id);
        }
        chain
    }

    /// Number of parent edges between `id` and the root.
    pub fn depth(&self, id: &UnitId) -> Option<u32> {
        self.walk_reaches_root(id)
    }

    pub fn is_ancestor_or_self(&self, ancestor: &UnitId, unit: &UnitId) -> bool {
        ancestor == unit || self.ancestors(unit).iter().any(|candidate| &candidate.id == ancestor)
    }

    fn walk_reaches_root(&self, id: &UnitId) -> Option<u32> {
        let mut depth = 0u32;
        let mut current = self.units.get(id)?;
        while let Some(parent) = &current.parent_id {
            depth += 1;
            if depth as usize > self.units.len() {
                return None;
            }
            current = self.units.get(parent)?;
        }
        Some(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::{OrgTree, TreeError};
    use crate::domain::unit::{OrganizationalUnit, UnitId};
    use crate::domain::user::UserId;

    fn id(value: &str) -> UnitId {
        UnitId(value.to_string())
    }

    fn campus() -> OrgTree {
        let root = id("unit-root");
        let mut tree = OrgTree::new();
        tree.add_unit(OrganizationalUnit::root("unit-root", "Academic and Student Services"))
            .expect("root");
        tree.add_unit(OrganizationalUnit::child("unit-advising", "Advising", &root))
            .expect("advising");
        tree.add_unit(OrganizationalUnit::child(
            "unit-peer",
            "Peer Advising",
            &id("unit-advising"),
        ))
        .expect("peer advising");
        tree
    }

    #[test]
    fn traversal_reports_parent_root_and_depth() {
        let tree = campus();

        assert_eq!(tree.get_parent(&id("unit-advising")).map(|u| &u.id), Some(&id("unit-root")));
        assert!(tree.is_root(&id("unit-root")));
        assert!(!tree.is_root(&id("unit-peer")));
        assert_eq!(tree.depth(&id("unit-peer")), Some(2));
        assert_eq!(tree.depth(&id("unit-root")), Some(0));
        assert_eq!(tree.depth(&id("unit-missing")), None);

        let ancestors: Vec<_> =
            tree.ancestors(&id("unit-peer")).into_iter().map(|u| u.id.0.as_str()).collect();
        assert_eq!(ancestors, vec!["unit-advising", "unit-root"]);
        assert_eq!(tree.children(&id("unit-root")).len(), 1);
    }

    #[test]
    fn append_requires_existing_parent() {
        let mut tree = campus();
        let error = tree
            .add_unit(OrganizationalUnit::child("unit-x", "Orphan", &id("unit-nowhere")))
            .expect_err("dangling parent");
        assert!(matches!(error, TreeError::UnknownParent { .. }));

        let duplicate = tree
            .add_unit(OrganizationalUnit::root("unit-root", "Second Root"))
            .expect_err("duplicate id");
        assert_eq!(duplicate, TreeError::DuplicateUnit(id("unit-root")));

        let second_root = tree
            .add_unit(OrganizationalUnit::root("unit-island", "Island"))
            .expect_err("second root");
        assert_eq!(
            second_root,
            TreeError::SecondRoot { unit: id("unit-island"), root: id("unit-root") }
        );
        assert!(tree.get(&id("unit-island")).is_none());
    }

    #[test]
    fn reparent_to_no_parent_keeps_a_single_root() {
        let mut tree = campus();

        let error = tree.reparent(&id("unit-peer"), None).expect_err("detach peer advising");
        assert_eq!(error, TreeError::SecondRoot { unit: id("unit-peer"), root: id("unit-root") });
        assert_eq!(tree.get_parent(&id("unit-peer")).map(|u| &u.id), Some(&id("unit-advising")));

        tree.reparent(&id("unit-root"), None).expect("root stays a root");
        assert!(tree.is_root(&id("unit-root")));
    }

    #[test]
    fn assign_manager_overwrites_previous_manager() {
        let mut tree = campus();
        let first = UserId("mgr-1".to_string());
        let second = UserId("mgr-2".to_string());

        assert_eq!(tree.assign_manager(&id("unit-advising"), &first), Ok(None));
        assert_eq!(tree.assign_manager(&id("unit-advising"), &second), Ok(Some(first)));
        assert_eq!(tree.get_manager(&id("unit-advising")), Some(&second));
        assert!(tree.get_manager(&id("unit-root")).is_none());
        assert!(matches!(
            tree.assign_manager(&id("unit-missing"), &second),
            Err(TreeError::UnknownUnit(_))
        ));
    }

    #[test]
    fn reparent_rejects_cycles_before_committing() {
        let mut tree = campus();

        let error = tree
            .reparent(&id("unit-root"), Some(&id("unit-peer")))
            .expect_err("root under its grandchild");
        assert!(matches!(error, TreeError::Cycle { .. }));
        assert!(tree.is_root(&id("unit-root")));

        let self_loop =
            tree.reparent(&id("unit-advising"), Some(&id("unit-advising"))).expect_err("self");
        assert!(matches!(self_loop, TreeError::Cycle { .. }));

        tree.reparent(&id("unit-peer"), Some(&id("unit-root"))).expect("flatten peer advising");
        assert_eq!(tree.depth(&id("unit-peer")), Some(1));
    }

    #[test]
    fn from_units_detects_stored_cycles() {
        let a = OrganizationalUnit {
            id: id("a"),
            name: "A".to_string(),
            parent_id: Some(id("b")),
            manager_id: None,
        };
        let b = OrganizationalUnit {
            id: id("b"),
            name: "B".to_string(),
            parent_id: Some(id("a")),
            manager_id: None,
        };

        let error = OrgTree::from_units([a, b]).expect_err("cycle in storage");
        assert!(matches!(error, TreeError::Cycle { .. }));
    }

    #[test]
    fn from_units_accepts_any_storage_order() {
        let root = id("unit-root");
        let tree = OrgTree::from_units([
            OrganizationalUnit::child("unit-health", "Health and Wellness", &root),
            OrganizationalUnit::root("unit-root", "Academic and Student Services"),
        ])
        .expect("valid tree");

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.find_by_name("Health and Wellness").map(|u| &u.id), Some(&id("unit-health")));
    }
}
