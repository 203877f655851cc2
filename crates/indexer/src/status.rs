use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use ragd_protocol::{ApiError, IndexPhase, IndexStatus, ProjectStats, Result};

/// Process-wide index status map.
///
/// Only the indexer task for a project mutates its entry; every other caller
/// reads snapshots. State is process-local and lost on restart.
pub struct StatusMap {
    statuses: RwLock<HashMap<String, IndexStatus>>,
    stats: RwLock<HashMap<String, ProjectStats>>,
}

impl StatusMap {
    pub fn new() -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
        }
    }

    /// Claim the project for a new job; `CONFLICT` while one is running.
    pub fn begin(&self, project: &str, total_files: usize) -> Result<()> {
        let mut statuses = self.statuses.write().expect("status lock");
        if let Some(existing) = statuses.get(project) {
            if existing.status == IndexPhase::Indexing {
                return Err(ApiError::Conflict(format!(
                    "already_indexing: project {project} has a job in progress"
                )));
            }
        }
        let mut status = IndexStatus::idle(project);
        status.status = IndexPhase::Indexing;
        status.total_files = Some(total_files);
        status.indexed_files = Some(0);
        status.last_updated = Some(Utc::now());
        statuses.insert(project.to_string(), status);
        Ok(())
    }

    pub fn record_file(&self, project: &str, error: Option<String>) {
        let mut statuses = self.statuses.write().expect("status lock");
        if let Some(status) = statuses.get_mut(project) {
            status.indexed_files = Some(status.indexed_files.unwrap_or(0) + 1);
            status.last_updated = Some(Utc::now());
            if let Some(error) = error {
                status.errors.push(error);
            }
        }
    }

    pub fn complete(&self, project: &str, vector_count: usize) {
        let mut statuses = self.statuses.write().expect("status lock");
        if let Some(status) = statuses.get_mut(project) {
            status.status = IndexPhase::Completed;
            status.vector_count = Some(vector_count);
            status.last_updated = Some(Utc::now());
        }
    }

    pub fn fail(&self, project: &str, error: String) {
        let mut statuses = self.statuses.write().expect("status lock");
        if let Some(status) = statuses.get_mut(project) {
            status.status = IndexPhase::Error;
            status.errors.push(error);
            status.last_updated = Some(Utc::now());
        }
    }

    pub fn cancel(&self, project: &str) {
        let mut statuses = self.statuses.write().expect("status lock");
        if let Some(status) = statuses.get_mut(project) {
            status.cancelled = true;
        }
    }

    pub fn is_cancelled(&self, project: &str) -> bool {
        let statuses = self.statuses.read().expect("status lock");
        statuses.get(project).map(|s| s.cancelled).unwrap_or(false)
    }

    pub fn snapshot(&self, project: &str) -> IndexStatus {
        let statuses = self.statuses.read().expect("status lock");
        statuses
            .get(project)
            .cloned()
            .unwrap_or_else(|| IndexStatus::idle(project))
    }

    pub fn set_stats(&self, project: &str, stats: ProjectStats) {
        let mut map = self.stats.write().expect("stats lock");
        map.insert(project.to_string(), stats);
    }

    pub fn project_stats(&self, project: &str) -> ProjectStats {
        let map = self.stats.read().expect("stats lock");
        map.get(project).cloned().unwrap_or_default()
    }
}

impl Default for StatusMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_rejects_concurrent_jobs() {
        let map = StatusMap::new();
        map.begin("demo", 10).unwrap();
        let err = map.begin("demo", 10).unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        // A different project is unaffected.
        map.begin("other", 1).unwrap();

        // Finishing frees the slot.
        map.complete("demo", 100);
        map.begin("demo", 5).unwrap();
    }

    #[test]
    fn test_progress_counters_and_errors() {
        let map = StatusMap::new();
        map.begin("demo", 3).unwrap();
        map.record_file("demo", None);
        map.record_file("demo", Some("bad.bin: parse failed".into()));
        let status = map.snapshot("demo");
        assert_eq!(status.indexed_files, Some(2));
        assert_eq!(status.errors.len(), 1);
        assert_eq!(status.status, IndexPhase::Indexing);
    }

    #[test]
    fn test_snapshot_of_unknown_project_is_idle() {
        let map = StatusMap::new();
        assert_eq!(map.snapshot("ghost").status, IndexPhase::Idle);
    }
}
