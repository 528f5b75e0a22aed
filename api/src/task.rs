use serde::{Deserialize, Serialize};

// counters kept by the enrichment worker pool since startup
//
// every scheduled job ends up in exactly one of the other buckets, so
// scheduled - (skipped + merged + failed + timed_out) is the number in flight
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct EnrichmentStatus {
    pub scheduled: i64,
    pub skipped: i64,
    pub merged: i64,
    pub failed: i64,
    pub timed_out: i64,
}

impl EnrichmentStatus {
    pub fn in_flight(&self) -> i64 {
        self.scheduled - (self.skipped + self.merged + self.failed + self.timed_out)
    }
}
