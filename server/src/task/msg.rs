use crate::service::{DRM, DRMResp};
use crate::task::enrich::EnrichmentHandle;
use api::{photo::PhotoUuid, task::EnrichmentStatus};

#[derive(Debug)]
pub enum TaskMsg {
    // schedule tagging for a photo, replying as soon as the job is queued
    Enrich {
        resp: DRMResp<EnrichmentHandle>,
        photo_uuid: PhotoUuid,
        uid: String,
    },
    Status {
        resp: DRMResp<EnrichmentStatus>,
    },
}

impl From<TaskMsg> for DRM {
    fn from(value: TaskMsg) -> Self {
        DRM::Task(value)
    }
}
