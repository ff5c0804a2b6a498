use std::collections::HashMap;

use crate::types::EventId;

/// Maps a branch to the event that created it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchTriggers {
    triggers: HashMap<String, EventId>,
}

impl BranchTriggers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the creating event. A later creation of the same name replaces it.
    pub fn add(&mut self, branch: impl Into<String>, event: EventId) {
        self.triggers.insert(branch.into(), event);
    }

    pub fn get(&self, branch: &str) -> Option<EventId> {
        self.triggers.get(branch).copied()
    }

    pub fn remove(&mut self, branch: &str) -> Option<EventId> {
        self.triggers.remove(branch)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_get_remove() {
        let mut triggers = BranchTriggers::new();
        let id = EventId::new_v4();
        triggers.add("feat", id);
        assert_eq!(triggers.get("feat"), Some(id));
        assert_eq!(triggers.get("other"), None);
        assert_eq!(triggers.remove("feat"), Some(id));
        assert!(triggers.is_empty());
    }

    #[test]
    fn recreation_replaces_trigger() {
        let mut triggers = BranchTriggers::new();
        let first = EventId::new_v4();
        let second = EventId::new_v4();
        triggers.add("feat", first);
        triggers.add("feat", second);
        assert_eq!(triggers.get("feat"), Some(second));
        assert_eq!(triggers.len(), 1);
    }
}
