//! Scope Catalog
//!
//! Registry of permission strings, their sensitivity tiers, and the
//! implied-scope expansion relation (e.g. `admin` implies `read` + `write`).

use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Sensitivity tier of a scope
///
/// Ordering is significant: a tier "fits under" every tier at or above it.
/// Agents carry a maximum tier; requesting any scope above that tier is
/// rejected with `insufficient_scope`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ScopeTier {
    /// Read-only access
    ReadOnly,

    /// Ordinary read/write access
    #[default]
    Standard,

    /// Sensitive operations; consent-gated at `/authorize`
    Privileged,

    /// Administrative authority
    Admin,
}

/// A single catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDef {
    /// Scope name, e.g. `read:calendar`
    pub name: String,

    /// Grouping category, e.g. `calendar`
    #[serde(default)]
    pub category: String,

    /// Sensitivity tier
    #[serde(default)]
    pub tier: ScopeTier,

    /// Scopes implied by holding this one
    #[serde(default)]
    pub implies: Vec<String>,
}

impl ScopeDef {
    /// Create a catalog entry with no implications
    pub fn new(name: impl Into<String>, category: impl Into<String>, tier: ScopeTier) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            tier,
            implies: vec![],
        }
    }

    /// Add implied scopes
    pub fn implies(mut self, implied: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.implies.extend(implied.into_iter().map(Into::into));
        self
    }
}

/// Scope Catalog
///
/// Pure data plus the expansion function. The implies relation is validated
/// to be cycle-free at construction, never at request time.
#[derive(Debug, Clone)]
pub struct ScopeCatalog {
    defs: HashMap<String, ScopeDef>,
}

impl ScopeCatalog {
    /// Build a catalog, rejecting unknown implies targets and cycles
    pub fn new(defs: impl IntoIterator<Item = ScopeDef>) -> Result<Self> {
        let mut map = HashMap::new();
        for def in defs {
            if map.insert(def.name.clone(), def).is_some() {
                return Err(AuthError::Config("duplicate scope definition".to_string()));
            }
        }

        for def in map.values() {
            for implied in &def.implies {
                if !map.contains_key(implied) {
                    return Err(AuthError::Config(format!(
                        "scope '{}' implies unknown scope '{}'",
                        def.name, implied
                    )));
                }
            }
        }

        let catalog = Self { defs: map };
        catalog.check_acyclic()?;
        Ok(catalog)
    }

    /// Number of registered scopes
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Look up a scope definition
    pub fn get(&self, name: &str) -> Option<&ScopeDef> {
        self.defs.get(name)
    }

    /// Expand a requested scope set to its transitive closure over the
    /// implies relation
    pub fn expand<'a>(
        &self,
        requested: impl IntoIterator<Item = &'a str>,
    ) -> Result<BTreeSet<String>> {
        let mut expanded = BTreeSet::new();
        let mut frontier: Vec<&str> = Vec::new();

        for name in requested {
            if !self.defs.contains_key(name) {
                return Err(AuthError::UnknownScope(name.to_string()));
            }
            frontier.push(name);
        }

        while let Some(name) = frontier.pop() {
            if !expanded.insert(name.to_string()) {
                continue;
            }
            // Presence validated at catalog construction
            if let Some(def) = self.defs.get(name) {
                for implied in &def.implies {
                    frontier.push(implied);
                }
            }
        }

        Ok(expanded)
    }

    /// Set containment after independently expanding both sides, so an
    /// un-expanded child scope implied by an expanded parent scope still
    /// validates
    pub fn is_subset<'a, 'b>(
        &self,
        child: impl IntoIterator<Item = &'a str>,
        parent: impl IntoIterator<Item = &'b str>,
    ) -> Result<bool> {
        let child = self.expand(child)?;
        let parent = self.expand(parent)?;
        Ok(child.is_subset(&parent))
    }

    /// Highest sensitivity tier among an already-expanded scope set
    ///
    /// Unknown names fold to the default tier; callers expand first, which
    /// rejects unknown names.
    pub fn max_tier<'a>(&self, scopes: impl IntoIterator<Item = &'a str>) -> ScopeTier {
        scopes
            .into_iter()
            .filter_map(|name| self.defs.get(name))
            .map(|def| def.tier)
            .max()
            .unwrap_or_default()
    }

    /// Depth-first cycle check over the implies relation
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        fn visit(
            name: &str,
            defs: &HashMap<String, ScopeDef>,
            marks: &mut HashMap<String, Mark>,
        ) -> Result<()> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    return Err(AuthError::Config(format!(
                        "scope implication cycle through '{}'",
                        name
                    )));
                }
                None => {}
            }

            marks.insert(name.to_string(), Mark::InProgress);
            if let Some(def) = defs.get(name) {
                for implied in &def.implies {
                    visit(implied, defs, marks)?;
                }
            }
            marks.insert(name.to_string(), Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for name in self.defs.keys() {
            visit(name, &self.defs, &mut marks)?;
        }
        Ok(())
    }
}
