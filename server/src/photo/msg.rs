use crate::photo::{PhotoUpload, UploadOutcome};
use crate::service::{DRM, DRMResp};
use api::{
    photo::{EditPhotoReq, PhotoRecord, PhotoUpdate, PhotoUuid},
    search::{PhotoFilter, SearchPhotosResp},
};

// every message carries the requesting uid; the photo service is where
// ownership is enforced
#[derive(Debug)]
pub enum PhotoMsg {
    UploadPhoto {
        resp: DRMResp<UploadOutcome>,
        uid: String,
        upload: PhotoUpload,
    },
    GetPhoto {
        resp: DRMResp<PhotoRecord>,
        uid: String,
        photo_uuid: PhotoUuid,
    },
    SearchPhotos {
        resp: DRMResp<SearchPhotosResp>,
        uid: String,
        filter: PhotoFilter,
    },
    UpdatePhoto {
        resp: DRMResp<PhotoRecord>,
        uid: String,
        photo_uuid: PhotoUuid,
        update: PhotoUpdate,
    },
    DeletePhoto {
        resp: DRMResp<()>,
        uid: String,
        photo_uuid: PhotoUuid,
    },
    EditPhoto {
        resp: DRMResp<PhotoRecord>,
        uid: String,
        photo_uuid: PhotoUuid,
        edit: EditPhotoReq,
    },
    GenerateTags {
        resp: DRMResp<PhotoRecord>,
        uid: String,
        photo_uuid: PhotoUuid,
    },
}

impl From<PhotoMsg> for DRM {
    fn from(value: PhotoMsg) -> Self {
        DRM::Photo(value)
    }
}
