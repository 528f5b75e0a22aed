use serde::{Deserialize, Serialize};

use crate::tag::Tag;

// structs and types

pub type PhotoUuid = i64;

// the core photo record
//
// uid is the owning user and is fixed at creation, as is the asset reference;
// edits produce a new record pointing at a new asset rather than rewriting
// anything in place
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Photo {
    pub uid: String,
    pub title: String,
    pub description: String,
    pub asset: PhotoAsset,
    pub digest: String,
    pub size: u64,
    pub mime: String,
    pub metadata: Option<PhotoMetadata>,
    pub tags: Vec<Tag>,
    pub ctime: i64,
    pub mtime: i64,
}

// reference to the physical files backing a record
//
// several records may share one asset (dedup), so the filename is the key the
// deletion path counts references against
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PhotoAsset {
    pub filename: String,
    pub path: String,
    pub thumb_path: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PhotoRecord {
    pub photo_uuid: PhotoUuid,
    #[serde(flatten)]
    pub photo: Photo,
}

// structured metadata pulled from the embedded exif block
//
// every field is best-effort, and the whole block is absent if nothing
// could be parsed at all
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PhotoMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lens: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aperture: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutter_speed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsCoordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<i64>,
}

impl PhotoMetadata {
    pub fn is_empty(&self) -> bool {
        self == &PhotoMetadata::default()
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct GpsCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

// the mutable part of a photo record
//
// None means "leave unchanged"; these three fields are the only ones a client
// may ever change, so anything else in a request body is dropped during
// deserialization
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PhotoUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<Tag>>,
}

impl PhotoUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.tags.is_none()
    }

    pub fn tags(tags: Vec<Tag>) -> Self {
        PhotoUpdate {
            tags: Some(tags),
            ..Default::default()
        }
    }
}

// messages

// upload a single file as multipart field "file"
//
// enrichment_scheduled only says that tagging was queued; the tags it finds
// show up on later reads of the record
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UploadPhotoResp {
    pub photo: PhotoRecord,
    pub enrichment_scheduled: bool,
}

// fetch a single photo
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GetPhotoResp {
    pub photo: PhotoRecord,
}

// change title, description, and/or tags
pub type UpdatePhotoReq = PhotoUpdate;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdatePhotoResp {
    pub photo: PhotoRecord,
}

// non-destructive edit, which always creates a new photo
//
// the crop rectangle is clamped against the source image, and the colour
// adjustments are percentages in [-100, 100] that are skipped when zero
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct CropRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct EditPhotoReq {
    #[serde(default)]
    pub crop: Option<CropRect>,
    #[serde(default)]
    pub brightness: f64,
    #[serde(default)]
    pub contrast: f64,
    #[serde(default)]
    pub saturation: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EditPhotoResp {
    pub photo: PhotoRecord,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeletePhotoResp {}

// run the tagging provider now and wait for the result
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GenerateTagsResp {
    pub photo: PhotoRecord,
}
