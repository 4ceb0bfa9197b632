//! Cache registry: logical cache roles and their versioned names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical category of cacheable content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheRole {
    Static,
    Images,
    Fonts,
    Dynamic,
    Pages,
}

impl CacheRole {
    /// Every role, in registry order.
    pub const ALL: [CacheRole; 5] = [
        CacheRole::Static,
        CacheRole::Images,
        CacheRole::Fonts,
        CacheRole::Dynamic,
        CacheRole::Pages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheRole::Static => "static",
            CacheRole::Images => "images",
            CacheRole::Fonts => "fonts",
            CacheRole::Dynamic => "dynamic",
            CacheRole::Pages => "pages",
        }
    }
}

impl fmt::Display for CacheRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A versioned physical cache name bound to a role.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheId {
    role: CacheRole,
    version: u32,
    name: String,
}

impl CacheId {
    pub fn new(prefix: &str, role: CacheRole, version: u32) -> Self {
        Self {
            role,
            version,
            name: format!("{}-{}-v{}", prefix, role, version),
        }
    }

    pub fn role(&self) -> CacheRole {
        self.role
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The cache identifiers of one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRegistry {
    prefix: String,
    version: u32,
}

impl CacheRegistry {
    pub fn new(prefix: impl Into<String>, version: u32) -> Self {
        Self {
            prefix: prefix.into(),
            version,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Identifier for a role.
    pub fn id(&self, role: CacheRole) -> CacheId {
        CacheId::new(&self.prefix, role, self.version)
    }

    /// The expected identifier set, one per role.
    pub fn ids(&self) -> Vec<CacheId> {
        CacheRole::ALL.iter().map(|role| self.id(*role)).collect()
    }

    /// Names of the expected identifier set.
    pub fn names(&self) -> Vec<String> {
        self.ids().into_iter().map(|id| id.name).collect()
    }

    /// Whether `name` belongs to this version's set.
    pub fn contains(&self, name: &str) -> bool {
        CacheRole::ALL
            .iter()
            .any(|role| self.id(*role).name() == name)
    }

    /// Cache names to consult for a role: the role's own cache first, then the
    /// rest of this version's caches.
    pub fn lookup_order(&self, role: CacheRole) -> Vec<String> {
        std::iter::once(role)
            .chain(CacheRole::ALL.iter().copied().filter(|r| *r != role))
            .map(|r| self.id(r).name)
            .collect()
    }
}
