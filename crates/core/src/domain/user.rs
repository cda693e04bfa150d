use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::unit::UnitId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability tags. They do not form a hierarchy: a manager is not implicitly
/// a submitter, and an admin is not implicitly a manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Manager,
    Employee,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::User, Role::Manager, Role::Employee];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Manager => "manager",
            Self::Employee => "employee",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "manager" => Some(Self::Manager),
            "employee" => Some(Self::Employee),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Admin => "Full administrative access",
            Self::User => "Standard user access",
            Self::Manager => "Academic manager access",
            Self::Employee => "Employee access",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub active: bool,
    pub roles: BTreeSet<Role>,
    pub unit_id: Option<UnitId>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: UserId(id.into()),
            name: name.into(),
            email: String::new(),
            active: true,
            roles: BTreeSet::new(),
            unit_id: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn in_unit(mut self, unit: &UnitId) -> Self {
        self.unit_id = Some(unit.clone());
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn belongs_to(&self, unit: &UnitId) -> bool {
        self.unit_id.as_ref() == Some(unit)
    }
}
