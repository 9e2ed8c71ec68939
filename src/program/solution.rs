use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::ModelSolution;

/// Everything a structured solver writes back on commit
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommittedSolution {
    pub objective: f64,
    pub first_stage: ModelSolution,
    /// One entry per scenario, in flattened partition order
    pub scenarios: Vec<ModelSolution>,
}

impl CommittedSolution {
    pub fn decision(&self) -> &[f64] {
        &self.first_stage.primal
    }
}

/// Shared, read-mostly view of a program's committed solution
///
/// Writers replace the whole `Arc`; readers clone it out, so a reader holds
/// either the previous or the new solution and never a mix.
#[derive(Debug, Clone, Default)]
pub struct SolutionHandle {
    inner: Arc<RwLock<Option<Arc<CommittedSolution>>>>,
}

impl SolutionHandle {
    pub fn current(&self) -> Option<Arc<CommittedSolution>> {
        self.inner.read().clone()
    }

    pub fn is_committed(&self) -> bool {
        self.inner.read().is_some()
    }

    pub(crate) fn publish(&self, solution: CommittedSolution) {
        *self.inner.write() = Some(Arc::new(solution));
    }

    pub(crate) fn clear(&self) {
        *self.inner.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_keep_their_snapshot() {
        let handle = SolutionHandle::default();
        assert!(handle.current().is_none());

        handle.publish(CommittedSolution {
            objective: 1.0,
            ..Default::default()
        });
        let snapshot = handle.current().unwrap();

        let reader = handle.clone();
        handle.publish(CommittedSolution {
            objective: 2.0,
            ..Default::default()
        });
        assert_eq!(snapshot.objective, 1.0);
        assert_eq!(reader.current().unwrap().objective, 2.0);

        handle.clear();
        assert!(!reader.is_committed());
    }
}
