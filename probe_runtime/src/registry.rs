//! In-memory probe registry.
//!
//! Keeps registered descriptors in registration order and turns a
//! [`CheckQuery`] into the descriptors to execute.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use probe_core::{CheckDescriptor, CheckId, ProbeError, Result};

/// Which registered checks to run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CheckQuery {
    /// Checks carrying any of the configured default tags, or every check
    /// when no default tags are configured.
    #[default]
    Default,
    /// Exactly these checks, in this order.
    Ids(Vec<CheckId>),
    /// Checks carrying any of these tags. An empty list means `Default`.
    Tags(Vec<String>),
}

impl CheckQuery {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CheckId>,
    {
        Self::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Tags(tags.into_iter().map(Into::into).collect())
    }
}

/// Registered check descriptors keyed by id.
#[derive(Debug, Default)]
pub struct ProbeRegistry {
    checks: RwLock<IndexMap<CheckId, CheckDescriptor>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor. Ids are unique.
    pub fn register(&self, descriptor: CheckDescriptor) -> Result<()> {
        let mut checks = self.write();
        if checks.contains_key(descriptor.id()) {
            return Err(ProbeError::DuplicateCheck(descriptor.id().clone()));
        }
        tracing::debug!(check = %descriptor.id(), title = descriptor.title(), "Registered check");
        checks.insert(descriptor.id().clone(), descriptor);
        Ok(())
    }

    /// Removes a descriptor and returns it.
    pub fn withdraw(&self, id: &CheckId) -> Result<CheckDescriptor> {
        self.write()
            .shift_remove(id)
            .ok_or_else(|| ProbeError::UnknownCheck(id.clone()))
    }

    pub fn get(&self, id: &CheckId) -> Option<CheckDescriptor> {
        self.read().get(id).cloned()
    }

    /// Ids of all registered checks in registration order.
    pub fn ids(&self) -> Vec<CheckId> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Resolves a query against the registered checks.
    ///
    /// Fails with [`ProbeError::UnknownCheck`] if an id query names an
    /// unregistered check. Tag queries never fail; they may select nothing.
    pub fn select(&self, query: &CheckQuery, default_tags: &[String]) -> Result<Vec<CheckDescriptor>> {
        let checks = self.read();
        match query {
            CheckQuery::Ids(ids) => ids
                .iter()
                .map(|id| {
                    checks
                        .get(id)
                        .cloned()
                        .ok_or_else(|| ProbeError::UnknownCheck(id.clone()))
                })
                .collect(),
            CheckQuery::Tags(tags) if !tags.is_empty() => Ok(Self::tagged(&checks, tags)),
            CheckQuery::Tags(_) | CheckQuery::Default => {
                if default_tags.is_empty() {
                    Ok(checks.values().cloned().collect())
                } else {
                    Ok(Self::tagged(&checks, default_tags))
                }
            }
        }
    }

    fn tagged(checks: &IndexMap<CheckId, CheckDescriptor>, tags: &[String]) -> Vec<CheckDescriptor> {
        checks
            .values()
            .filter(|d| d.has_any_tag(tags))
            .cloned()
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<CheckId, CheckDescriptor>> {
        self.checks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<CheckId, CheckDescriptor>> {
        self.checks.write().unwrap_or_else(PoisonError::into_inner)
    }
}
