//! Subject registry contract.
//!
//! Patient records live outside this crate; the engine only asks whether an id
//! is known before accepting readings or sessions for it.

use std::collections::HashSet;
use std::sync::RwLock;

use crate::error::{HemoError, HemoResult};
use crate::reading::SubjectId;

/// Answers whether a subject exists.
pub trait SubjectRegistry: Send + Sync {
    fn contains(&self, subject: &SubjectId) -> HemoResult<bool>;
}

/// Accepts every subject id.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenRegistry;

impl SubjectRegistry for OpenRegistry {
    fn contains(&self, _subject: &SubjectId) -> HemoResult<bool> {
        Ok(true)
    }
}

/// Registry backed by an in-memory set.
#[derive(Debug, Default)]
pub struct InMemorySubjectRegistry {
    known: RwLock<HashSet<SubjectId>>,
}

impl InMemorySubjectRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subject`. Returns `false` if it was already known.
    pub fn register(&self, subject: SubjectId) -> HemoResult<bool> {
        let mut known = self
            .known
            .write()
            .map_err(|_| HemoError::internal("poisoned lock: subjects.register"))?;
        Ok(known.insert(subject))
    }

    pub fn remove(&self, subject: &SubjectId) -> HemoResult<bool> {
        let mut known = self
            .known
            .write()
            .map_err(|_| HemoError::internal("poisoned lock: subjects.remove"))?;
        Ok(known.remove(subject))
    }
}

impl FromIterator<SubjectId> for InMemorySubjectRegistry {
    fn from_iter<I: IntoIterator<Item = SubjectId>>(iter: I) -> Self {
        Self {
            known: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl SubjectRegistry for InMemorySubjectRegistry {
    fn contains(&self, subject: &SubjectId) -> HemoResult<bool> {
        let known = self
            .known
            .read()
            .map_err(|_| HemoError::internal("poisoned lock: subjects.contains"))?;
        Ok(known.contains(subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_registry_tracks_membership() {
        let registry = InMemorySubjectRegistry::new();
        let p1 = SubjectId::new("p1").unwrap();
        assert!(!registry.contains(&p1).unwrap());
        assert!(registry.register(p1.clone()).unwrap());
        assert!(!registry.register(p1.clone()).unwrap());
        assert!(registry.contains(&p1).unwrap());
        assert!(registry.remove(&p1).unwrap());
        assert!(!registry.contains(&p1).unwrap());
    }

    #[test]
    fn open_registry_accepts_anything() {
        assert!(OpenRegistry.contains(&SubjectId::new("anyone").unwrap()).unwrap());
    }
}
