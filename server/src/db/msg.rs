use api::{
    photo::{Photo, PhotoRecord, PhotoUpdate, PhotoUuid},
    search::PhotoFilter,
};

use crate::service::{DRM, DRMResp};

#[derive(Debug)]
pub enum DbMsg {
    AddPhoto {
        resp: DRMResp<PhotoUuid>,
        photo: Photo,
    },
    GetPhoto {
        resp: DRMResp<Option<Photo>>,
        photo_uuid: PhotoUuid,
    },
    FindPhotoByDigest {
        resp: DRMResp<Option<PhotoRecord>>,
        digest: String,
    },
    UpdatePhoto {
        resp: DRMResp<()>,
        photo_uuid: PhotoUuid,
        update: PhotoUpdate,
    },
    DeletePhoto {
        resp: DRMResp<()>,
        photo_uuid: PhotoUuid,
    },
    CountPhotosByFilename {
        resp: DRMResp<u64>,
        filename: String,
    },
    SearchPhotos {
        resp: DRMResp<(Vec<PhotoRecord>, u64)>,
        uid: String,
        filter: PhotoFilter,
    },
}

impl From<DbMsg> for DRM {
    fn from(value: DbMsg) -> Self {
        DRM::Db(value)
    }
}
