use anyhow::Result;
use async_trait::async_trait;

use crate::service::{DRInner, DRMSender, call};
use api::{photo::PhotoUuid, task::EnrichmentStatus};

pub mod enrich;
pub mod msg;
pub mod svc;

use enrich::EnrichmentHandle;
use msg::TaskMsg;

#[async_trait]
pub trait DRTaskService: DRInner {
    // queue a tagging job; the returned handle resolves once the job is done
    async fn enrich(&self, photo_uuid: PhotoUuid, uid: String) -> Result<EnrichmentHandle>;

    async fn status(&self) -> Result<EnrichmentStatus>;
}

pub async fn schedule_enrichment(
    sender: &DRMSender,
    photo_uuid: PhotoUuid,
    uid: String,
) -> Result<EnrichmentHandle> {
    call(sender, |resp| {
        TaskMsg::Enrich {
            resp,
            photo_uuid,
            uid,
        }
        .into()
    })
    .await
}

pub async fn enrichment_status(sender: &DRMSender) -> Result<EnrichmentStatus> {
    call(sender, |resp| TaskMsg::Status { resp }.into()).await
}
