//! Result types produced by the worker.

use serde::{Deserialize, Serialize};

/// Outcome of one stamp type on one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampResult {
    pub document_id: u64,
    pub document_title: String,
    pub stamp_type: String,
    pub stamp_text: String,
    /// Resolved date; always `None` for failed runs.
    pub stamp_date: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    /// Wall-clock time of the document's pipeline.
    pub processing_ms: u64,
}

/// Success / failure counts for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    /// Distinct documents that produced at least one result.
    pub documents: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl CycleSummary {
    pub fn from_results(results: &[StampResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let mut ids: Vec<u64> = results.iter().map(|r| r.document_id).collect();
        ids.sort_unstable();
        ids.dedup();
        Self {
            documents: ids.len(),
            succeeded,
            failed: results.len() - succeeded,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}
