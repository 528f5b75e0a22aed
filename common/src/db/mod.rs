use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::DRConfig;
use api::{
    photo::{Photo, PhotoRecord, PhotoUpdate, PhotoUuid},
    search::PhotoFilter,
};

pub mod mariadb;
pub use mariadb::MariaDBBackend;

pub mod memory;
pub use memory::MemoryBackend;

// these are the metadata repository calls that any backend must be able to process
//
// records are keyed by photo_uuid, which the backend assigns; ownership is not
// checked here, that is the orchestrator's job
#[async_trait]
pub trait DbBackend: Send + Sync + 'static {
    fn new(config: Arc<DRConfig>) -> Result<Self>
    where
        Self: Sized;

    // create whatever tables/indices the backend needs, idempotently
    async fn migrate(&self) -> anyhow::Result<()>;

    async fn add_photo(&self, photo: Photo) -> anyhow::Result<PhotoUuid>;

    async fn get_photo(&self, photo_uuid: PhotoUuid) -> anyhow::Result<Option<Photo>>;

    // any record, from any owner, whose content has this digest
    async fn find_photo_by_digest(&self, digest: String) -> anyhow::Result<Option<PhotoRecord>>;

    // apply the Some fields of the update and bump mtime
    async fn update_photo(&self, photo_uuid: PhotoUuid, update: PhotoUpdate) -> anyhow::Result<()>;

    async fn delete_photo(&self, photo_uuid: PhotoUuid) -> anyhow::Result<()>;

    // number of records, from any owner, whose asset is this file
    async fn count_photos_by_filename(&self, filename: String) -> anyhow::Result<u64>;

    // one page of a user's photos, newest first, plus the total number of matches
    async fn search_photos(
        &self,
        uid: String,
        filter: PhotoFilter,
    ) -> anyhow::Result<(Vec<PhotoRecord>, u64)>;
}
