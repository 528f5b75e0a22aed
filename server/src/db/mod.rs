use std::{future::Future, time::Duration};

use anyhow::Result;
use tokio::time::timeout;

use crate::service::{DRMRegistry, DRMSender, ServiceType, call};
use api::{
    photo::{Photo, PhotoRecord, PhotoUpdate, PhotoUuid},
    search::PhotoFilter,
};
use common::config::DRConfig;

pub mod msg;
pub mod svc;

use msg::DbMsg;

// typed front end to the db service
//
// every round-trip is bounded by the configured deadline, so a wedged backend
// surfaces as an error on the caller's side instead of a hung request
#[derive(Clone, Debug)]
pub struct DbClient {
    sender: DRMSender,
    deadline: Duration,
}

impl DbClient {
    pub fn new(config: &DRConfig, registry: &DRMRegistry) -> Result<Self> {
        Ok(DbClient {
            sender: registry.get(&ServiceType::Db)?,
            deadline: Duration::from_secs(config.db.timeout.max(1)),
        })
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.deadline, fut)
            .await
            .map_err(|_| anyhow::Error::msg("metadata repository request timed out"))?
    }

    pub async fn add_photo(&self, photo: Photo) -> Result<PhotoUuid> {
        self.bounded(call(&self.sender, |resp| {
            DbMsg::AddPhoto { resp, photo }.into()
        }))
        .await
    }

    pub async fn get_photo(&self, photo_uuid: PhotoUuid) -> Result<Option<Photo>> {
        self.bounded(call(&self.sender, |resp| {
            DbMsg::GetPhoto { resp, photo_uuid }.into()
        }))
        .await
    }

    pub async fn find_photo_by_digest(&self, digest: String) -> Result<Option<PhotoRecord>> {
        self.bounded(call(&self.sender, |resp| {
            DbMsg::FindPhotoByDigest { resp, digest }.into()
        }))
        .await
    }

    pub async fn update_photo(&self, photo_uuid: PhotoUuid, update: PhotoUpdate) -> Result<()> {
        self.bounded(call(&self.sender, |resp| {
            DbMsg::UpdatePhoto {
                resp,
                photo_uuid,
                update,
            }
            .into()
        }))
        .await
    }

    pub async fn delete_photo(&self, photo_uuid: PhotoUuid) -> Result<()> {
        self.bounded(call(&self.sender, |resp| {
            DbMsg::DeletePhoto { resp, photo_uuid }.into()
        }))
        .await
    }

    pub async fn count_photos_by_filename(&self, filename: String) -> Result<u64> {
        self.bounded(call(&self.sender, |resp| {
            DbMsg::CountPhotosByFilename { resp, filename }.into()
        }))
        .await
    }

    pub async fn search_photos(
        &self,
        uid: String,
        filter: PhotoFilter,
    ) -> Result<(Vec<PhotoRecord>, u64)> {
        self.bounded(call(&self.sender, |resp| {
            DbMsg::SearchPhotos { resp, uid, filter }.into()
        }))
        .await
    }
}
