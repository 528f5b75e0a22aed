use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::service::{DRInner, DRMRegistry, DRMSender, ServiceType, call};
use crate::task::enrich::EnrichmentHandle;
use api::{
    photo::{EditPhotoReq, PhotoRecord, PhotoUpdate, PhotoUuid},
    search::{PhotoFilter, SearchPhotosResp},
};

pub mod msg;
pub mod svc;

use msg::PhotoMsg;

// orchestrator failures a caller needs to tell apart
//
// anything else (storage, repository, provider) is carried as a plain
// anyhow::Error and surfaces as an internal error
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PhotoError {
    #[error("photo belongs to another user")]
    Forbidden,

    #[error("photo not found")]
    NotFound,

    #[error("{0}")]
    UnsupportedImage(String),
}

pub type UploadStream = Box<dyn AsyncRead + Send + Sync + Unpin>;

// an incoming upload
//
// filename and mime are whatever the client claimed; neither is trusted beyond
// picking an extension and a fallback content type
pub struct PhotoUpload {
    pub filename: String,
    pub mime: Option<String>,
    pub stream: UploadStream,
}

impl fmt::Debug for PhotoUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoUpload")
            .field("filename", &self.filename)
            .field("mime", &self.mime)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct UploadOutcome {
    pub record: PhotoRecord,
    // None when ai tagging is off or could not be scheduled
    pub enrichment: Option<EnrichmentHandle>,
}

#[async_trait]
pub trait DRPhotoService: DRInner {
    async fn upload_photo(&self, uid: String, upload: PhotoUpload) -> Result<UploadOutcome>;

    async fn get_photo(&self, uid: String, photo_uuid: PhotoUuid) -> Result<PhotoRecord>;

    async fn search_photos(&self, uid: String, filter: PhotoFilter) -> Result<SearchPhotosResp>;

    async fn update_photo(
        &self,
        uid: String,
        photo_uuid: PhotoUuid,
        update: PhotoUpdate,
    ) -> Result<PhotoRecord>;

    async fn delete_photo(&self, uid: String, photo_uuid: PhotoUuid) -> Result<()>;

    async fn edit_photo(
        &self,
        uid: String,
        photo_uuid: PhotoUuid,
        edit: EditPhotoReq,
    ) -> Result<PhotoRecord>;

    async fn generate_tags(&self, uid: String, photo_uuid: PhotoUuid) -> Result<PhotoRecord>;
}

// typed front end to the photo service, used by the http layer
#[derive(Clone, Debug)]
pub struct PhotoClient {
    sender: DRMSender,
}

impl PhotoClient {
    pub fn new(registry: &DRMRegistry) -> Result<Self> {
        Ok(PhotoClient {
            sender: registry.get(&ServiceType::Photo)?,
        })
    }

    pub async fn upload_photo(&self, uid: String, upload: PhotoUpload) -> Result<UploadOutcome> {
        call(&self.sender, |resp| {
            PhotoMsg::UploadPhoto { resp, uid, upload }.into()
        })
        .await
    }

    pub async fn get_photo(&self, uid: String, photo_uuid: PhotoUuid) -> Result<PhotoRecord> {
        call(&self.sender, |resp| {
            PhotoMsg::GetPhoto {
                resp,
                uid,
                photo_uuid,
            }
            .into()
        })
        .await
    }

    pub async fn search_photos(&self, uid: String, filter: PhotoFilter) -> Result<SearchPhotosResp> {
        call(&self.sender, |resp| {
            PhotoMsg::SearchPhotos { resp, uid, filter }.into()
        })
        .await
    }

    pub async fn update_photo(
        &self,
        uid: String,
        photo_uuid: PhotoUuid,
        update: PhotoUpdate,
    ) -> Result<PhotoRecord> {
        call(&self.sender, |resp| {
            PhotoMsg::UpdatePhoto {
                resp,
                uid,
                photo_uuid,
                update,
            }
            .into()
        })
        .await
    }

    pub async fn delete_photo(&self, uid: String, photo_uuid: PhotoUuid) -> Result<()> {
        call(&self.sender, |resp| {
            PhotoMsg::DeletePhoto {
                resp,
                uid,
                photo_uuid,
            }
            .into()
        })
        .await
    }

    pub async fn edit_photo(
        &self,
        uid: String,
        photo_uuid: PhotoUuid,
        edit: EditPhotoReq,
    ) -> Result<PhotoRecord> {
        call(&self.sender, |resp| {
            PhotoMsg::EditPhoto {
                resp,
                uid,
                photo_uuid,
                edit,
            }
            .into()
        })
        .await
    }

    pub async fn generate_tags(&self, uid: String, photo_uuid: PhotoUuid) -> Result<PhotoRecord> {
        call(&self.sender, |resp| {
            PhotoMsg::GenerateTags {
                resp,
                uid,
                photo_uuid,
            }
            .into()
        })
        .await
    }
}
