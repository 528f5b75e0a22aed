use std::marker::PhantomData;
use std::sync::Arc;

use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::db::msg::DbMsg;
use crate::service::{
    DRInner, DRM, DRMReceiver, DRMRegistry, DarkroomService, ServiceType, spawn_message_loop,
};
use common::config::DRConfig;
use common::db::DbBackend;

pub struct DbService<B: DbBackend> {
    config: Arc<DRConfig>,
    receiver: Arc<Mutex<DRMReceiver>>,
    handle: AsyncCell<tokio::task::JoinHandle<anyhow::Result<()>>>,
    backend: PhantomData<B>,
}

#[async_trait]
impl<B: DbBackend> DarkroomService for DbService<B> {
    type Inner = DbRunner<B>;

    fn create(config: Arc<DRConfig>, registry: &DRMRegistry) -> anyhow::Result<Self> {
        let (tx, rx) = tokio::sync::mpsc::channel::<DRM>(1024);

        registry.insert(ServiceType::Db, tx)?;

        Ok(DbService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            handle: AsyncCell::new(),
            backend: PhantomData::<B>,
        })
    }

    #[instrument(skip(self, registry))]
    async fn start(&self, registry: &DRMRegistry) -> anyhow::Result<()> {
        info!("starting db service");

        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(DbRunner::<B>::new(self.config.clone(), registry.clone())?);

        state.backend.migrate().await?;

        let handle = spawn_message_loop("db", receiver, state);

        self.handle.set(handle);

        debug!("started db service");

        Ok(())
    }
}

pub struct DbRunner<B: DbBackend> {
    registry: DRMRegistry,
    backend: B,
}

#[async_trait]
impl<B: DbBackend> DRInner for DbRunner<B> {
    fn new(config: Arc<DRConfig>, registry: DRMRegistry) -> anyhow::Result<Self> {
        Ok(DbRunner {
            registry: registry.clone(),
            backend: B::new(config.clone())?,
        })
    }

    fn registry(&self) -> DRMRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, drm: DRM) -> anyhow::Result<()> {
        match drm {
            DRM::Db(message) => match message {
                DbMsg::AddPhoto { resp, photo } => {
                    self.respond(resp, self.backend.add_photo(photo)).await
                }
                DbMsg::GetPhoto { resp, photo_uuid } => {
                    self.respond(resp, self.backend.get_photo(photo_uuid)).await
                }
                DbMsg::FindPhotoByDigest { resp, digest } => {
                    self.respond(resp, self.backend.find_photo_by_digest(digest))
                        .await
                }
                DbMsg::UpdatePhoto {
                    resp,
                    photo_uuid,
                    update,
                } => {
                    self.respond(resp, self.backend.update_photo(photo_uuid, update))
                        .await
                }
                DbMsg::DeletePhoto { resp, photo_uuid } => {
                    self.respond(resp, self.backend.delete_photo(photo_uuid))
                        .await
                }
                DbMsg::CountPhotosByFilename { resp, filename } => {
                    self.respond(resp, self.backend.count_photos_by_filename(filename))
                        .await
                }
                DbMsg::SearchPhotos { resp, uid, filter } => {
                    self.respond(resp, self.backend.search_photos(uid, filter))
                        .await
                }
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}
