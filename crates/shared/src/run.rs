//! Per-run correlation context.
//!
//! The run id is opaque and exists for log/ledger correlation only; it is
//! not a lock. It is passed explicitly into every phase that records
//! anything, never held as ambient global state.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn generate() -> Self {
        let started_at = Utc::now();
        let run_id = format!(
            "run-{}-{:x}",
            started_at.format("%Y%m%d%H%M%S"),
            started_at.timestamp_subsec_nanos()
        );
        Self { run_id, started_at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = RunContext::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = RunContext::generate();
        assert_ne!(a.run_id, b.run_id);
    }
}
