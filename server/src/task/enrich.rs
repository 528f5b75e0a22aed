use std::{
    fmt,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use async_cell::sync::AsyncCell;
use tokio::{sync::Semaphore, time::timeout};
use tracing::{debug, instrument, warn};

use crate::db::DbClient;
use api::{
    photo::{Photo, PhotoUpdate, PhotoUuid},
    tag::Tag,
    task::EnrichmentStatus,
};
use common::{
    store::ContentStore,
    tagger::{ImageTagger, TaggerError, TaggerHandle},
    tags::{count_added, merge_tags},
};

// how a single enrichment job ended
#[derive(Clone, Debug, PartialEq)]
pub enum EnrichmentOutcome {
    // the provider's tags were merged into the record
    Merged { added: usize },
    // no provider was available, so nothing was attempted
    Skipped(TaggerError),
    Failed(String),
    // the deadline passed, either while queued or while running
    TimedOut,
}

// completion handle for a queued enrichment job
//
// the job runs whether or not anyone holds the handle; uploads drop it, while
// on-demand tagging and the tests wait on it
#[derive(Clone)]
pub struct EnrichmentHandle {
    photo_uuid: PhotoUuid,
    cell: Arc<AsyncCell<EnrichmentOutcome>>,
}

impl fmt::Debug for EnrichmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichmentHandle")
            .field("photo_uuid", &self.photo_uuid)
            .finish_non_exhaustive()
    }
}

impl EnrichmentHandle {
    fn new(photo_uuid: PhotoUuid) -> Self {
        EnrichmentHandle {
            photo_uuid,
            cell: Arc::new(AsyncCell::new()),
        }
    }

    pub fn photo_uuid(&self) -> PhotoUuid {
        self.photo_uuid
    }

    pub async fn finished(&self) -> EnrichmentOutcome {
        self.cell.get().await
    }

    fn resolve(&self, outcome: EnrichmentOutcome) {
        self.cell.set(outcome);
    }
}

#[derive(Debug, Default)]
pub struct EnrichmentStats {
    scheduled: AtomicI64,
    skipped: AtomicI64,
    merged: AtomicI64,
    failed: AtomicI64,
    timed_out: AtomicI64,
}

impl EnrichmentStats {
    fn record(&self, outcome: &EnrichmentOutcome) {
        let counter = match outcome {
            EnrichmentOutcome::Merged { .. } => &self.merged,
            EnrichmentOutcome::Skipped(_) => &self.skipped,
            EnrichmentOutcome::Failed(_) => &self.failed,
            EnrichmentOutcome::TimedOut => &self.timed_out,
        };

        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EnrichmentStatus {
        EnrichmentStatus {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

// everything a job needs, shared between all jobs
pub struct EnrichContext {
    pub db: DbClient,
    pub store: ContentStore,
    pub tagger: TaggerHandle,
    pub permits: Semaphore,
    pub deadline: Duration,
    pub stats: EnrichmentStats,
}

impl EnrichContext {
    // queue a job on the pool
    //
    // the handle is returned immediately; the job itself waits for a permit,
    // and the deadline starts now rather than when the permit is granted
    pub fn spawn(self: &Arc<Self>, photo_uuid: PhotoUuid, uid: String) -> EnrichmentHandle {
        let handle = EnrichmentHandle::new(photo_uuid);

        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);

        let context = Arc::clone(self);
        let job = handle.clone();

        tokio::task::spawn(async move {
            let outcome = context.run(photo_uuid, uid).await;

            match &outcome {
                EnrichmentOutcome::Merged { added } => {
                    debug!({ photo_uuid = photo_uuid, added = added }, "enrichment merged")
                }
                EnrichmentOutcome::Skipped(err) => {
                    debug!({ photo_uuid = photo_uuid, reason = %err }, "enrichment skipped")
                }
                EnrichmentOutcome::Failed(err) => {
                    warn!({ photo_uuid = photo_uuid, error = %err }, "enrichment failed")
                }
                EnrichmentOutcome::TimedOut => {
                    warn!({ photo_uuid = photo_uuid }, "enrichment timed out")
                }
            }

            context.stats.record(&outcome);
            job.resolve(outcome);
        });

        handle
    }

    async fn run(&self, photo_uuid: PhotoUuid, uid: String) -> EnrichmentOutcome {
        let tagger = match &self.tagger {
            Ok(tagger) => Arc::clone(tagger),
            Err(err) => return EnrichmentOutcome::Skipped(err.clone()),
        };

        let job = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| anyhow::Error::msg("worker pool closed"))?;

            self.merged_tags(tagger.as_ref(), photo_uuid, &uid).await
        };

        let (added, merged) = match timeout(self.deadline, job).await {
            Ok(Ok(found)) => found,
            Ok(Err(err)) => return EnrichmentOutcome::Failed(err.to_string()),
            Err(_) => return EnrichmentOutcome::TimedOut,
        };

        // the write happens only once the deadline has been met, so a job
        // reported as timed out never touches the record
        if added > 0 {
            if let Err(err) = self
                .db
                .update_photo(photo_uuid, PhotoUpdate::tags(merged))
                .await
            {
                return EnrichmentOutcome::Failed(err.to_string());
            }
        }

        EnrichmentOutcome::Merged { added }
    }

    // prefer the thumbnail, which is smaller, falling back to the original
    fn tagging_path(&self, photo: &Photo) -> Option<PathBuf> {
        if let Some(thumb) = self.store.resolve_disk_path(&photo.asset.thumb_path) {
            if thumb.is_file() {
                return Some(thumb);
            }
        }

        self.store.resolve_disk_path(&photo.asset.path)
    }

    // the record's current tags with the provider's suggestions merged in,
    // along with how many of them are new
    #[instrument(skip(self, tagger, uid))]
    async fn merged_tags(
        &self,
        tagger: &dyn ImageTagger,
        photo_uuid: PhotoUuid,
        uid: &str,
    ) -> anyhow::Result<(usize, Vec<Tag>)> {
        let photo = self
            .db
            .get_photo(photo_uuid)
            .await?
            .ok_or_else(|| anyhow::Error::msg("photo no longer exists"))?;

        if photo.uid != uid {
            return Err(anyhow::Error::msg("photo belongs to another user"));
        }

        let path = self
            .tagging_path(&photo)
            .ok_or_else(|| anyhow::Error::msg("failed to resolve photo file path"))?;

        let suggested = tagger.generate_tags(&path).await?;

        // the record may have been edited while the provider was thinking, so
        // merge into whatever is there now rather than what we read above
        let current = self
            .db
            .get_photo(photo_uuid)
            .await?
            .ok_or_else(|| anyhow::Error::msg("photo deleted during enrichment"))?;

        let merged = merge_tags(&current.tags, &suggested);
        let added = count_added(&current.tags, &merged);

        Ok((added, merged))
    }
}
