use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tracing::{Level, debug, info, instrument, warn};

use crate::db::DbClient;
use crate::service::{
    DRInner, DRM, DRMReceiver, DRMRegistry, DarkroomService, ServiceType, spawn_message_loop,
};
use crate::task::{
    DRTaskService,
    enrich::{EnrichContext, EnrichmentHandle, EnrichmentStats},
    msg::TaskMsg,
};
use api::{photo::PhotoUuid, task::EnrichmentStatus};
use common::{
    config::DRConfig,
    store::ContentStore,
    tagger::{TaggerHandle, create_tagger},
};

pub struct TaskService {
    config: Arc<DRConfig>,
    receiver: Arc<Mutex<DRMReceiver>>,
    handle: AsyncCell<tokio::task::JoinHandle<Result<()>>>,
    tagger: TaggerHandle,
}

impl TaskService {
    // replace the configured tagger before the service starts
    #[cfg(test)]
    pub fn with_tagger(mut self, tagger: TaggerHandle) -> Self {
        self.tagger = tagger;
        self
    }
}

#[async_trait]
impl DarkroomService for TaskService {
    type Inner = TaskRunner;

    fn create(config: Arc<DRConfig>, registry: &DRMRegistry) -> Result<Self> {
        let (tx, rx) = tokio::sync::mpsc::channel::<DRM>(1024);

        registry.insert(ServiceType::Task, tx)?;

        let tagger = create_tagger(&config.ai);

        if let Err(err) = &tagger {
            if config.ai.enabled {
                warn!({ error = %err }, "ai tagging is enabled but unavailable");
            }
        }

        Ok(TaskService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            handle: AsyncCell::new(),
            tagger,
        })
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &DRMRegistry) -> Result<()> {
        info!("starting task service");

        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(TaskRunner::with_tagger(
            self.config.clone(),
            registry.clone(),
            self.tagger.clone(),
        )?);

        self.handle
            .set(spawn_message_loop("task", receiver, state));

        debug!("started task service");
        Ok(())
    }
}

pub struct TaskRunner {
    registry: DRMRegistry,
    context: Arc<EnrichContext>,
}

impl TaskRunner {
    pub fn with_tagger(
        config: Arc<DRConfig>,
        registry: DRMRegistry,
        tagger: TaggerHandle,
    ) -> Result<Self> {
        let context = EnrichContext {
            db: DbClient::new(&config, &registry)?,
            store: ContentStore::new(config.fs.upload_dir.clone()),
            tagger,
            permits: Semaphore::new(config.task.enrich_threads.max(1)),
            deadline: Duration::from_secs(config.ai.timeout_secs()),
            stats: EnrichmentStats::default(),
        };

        Ok(TaskRunner {
            registry,
            context: Arc::new(context),
        })
    }
}

#[async_trait]
impl DRInner for TaskRunner {
    fn new(config: Arc<DRConfig>, registry: DRMRegistry) -> Result<Self> {
        let tagger = create_tagger(&config.ai);

        TaskRunner::with_tagger(config, registry, tagger)
    }

    fn registry(&self) -> DRMRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, drm: DRM) -> Result<()> {
        match drm {
            DRM::Task(message) => match message {
                TaskMsg::Enrich {
                    resp,
                    photo_uuid,
                    uid,
                } => self.respond(resp, self.enrich(photo_uuid, uid)).await,
                TaskMsg::Status { resp } => self.respond(resp, self.status()).await,
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}

#[async_trait]
impl DRTaskService for TaskRunner {
    #[instrument(level=Level::DEBUG, skip(self, uid))]
    async fn enrich(&self, photo_uuid: PhotoUuid, uid: String) -> Result<EnrichmentHandle> {
        debug!("scheduling enrichment");

        Ok(self.context.spawn(photo_uuid, uid))
    }

    async fn status(&self) -> Result<EnrichmentStatus> {
        Ok(self.context.stats.snapshot())
    }
}
