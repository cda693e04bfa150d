use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub String);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node in the approval hierarchy. Units only reference their parent; the
/// children relation is derived by the tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationalUnit {
    pub id: UnitId,
    pub name: String,
    pub parent_id: Option<UnitId>,
    pub manager_id: Option<UserId>,
}

impl OrganizationalUnit {
    pub fn root(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: UnitId(id.into()), name: name.into(), parent_id: None, manager_id: None }
    }

    pub fn child(id: impl Into<String>, name: impl Into<String>, parent: &UnitId) -> Self {
        Self {
            id: UnitId(id.into()),
            name: name.into(),
            parent_id: Some(parent.clone()),
            manager_id: None,
        }
    }

    pub fn with_manager(mut self, manager: &UserId) -> Self {
        self.manager_id = Some(manager.clone());
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}
