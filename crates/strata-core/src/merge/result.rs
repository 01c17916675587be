//! Merge statistics and the observers that receive them.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::scope::ScopePath;

/// Staleness totals accumulated over one merge call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub scope_path: ScopePath,
    /// Stale properties that went through the regular merge anyway.
    pub number_of_merged_properties: i32,
    /// Stale properties whose child value was dropped for the parent's.
    pub number_of_discarded_properties: i32,
}

impl MergeResult {
    pub fn new(scope_path: ScopePath) -> Self {
        Self {
            scope_path,
            number_of_merged_properties: 0,
            number_of_discarded_properties: 0,
        }
    }
}

/// Receives at most one [`MergeResult`] per merge call, and only when
/// staleness was found somewhere in the tree.
pub trait StalenessObserver: Send + Sync {
    fn on_merge_result(&self, result: &MergeResult);
}

impl<F> StalenessObserver for F
where
    F: Fn(&MergeResult) + Send + Sync,
{
    fn on_merge_result(&self, result: &MergeResult) {
        self(result)
    }
}

/// Ignores every result.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StalenessObserver for NoopObserver {
    fn on_merge_result(&self, _result: &MergeResult) {}
}

/// Keeps every result it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    results: Mutex<Vec<MergeResult>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<MergeResult> {
        self.results.lock().clone()
    }

    pub fn take(&self) -> Vec<MergeResult> {
        std::mem::take(&mut *self.results.lock())
    }
}

impl StalenessObserver for RecordingObserver {
    fn on_merge_result(&self, result: &MergeResult) {
        self.results.lock().push(result.clone());
    }
}
