use std::{future::Future, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::error;

use common::config::DRConfig;

// these are the services that make up the darkroom server backend
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ServiceType {
    Db,
    Photo,
    Task,
}

// DarkRoom Messages
//
// without higher-kinded types, we use the normal enum-of-enums
// to enable general safe message passing between services
pub type DRMSender = tokio::sync::mpsc::Sender<DRM>;
pub type DRMReceiver = tokio::sync::mpsc::Receiver<DRM>;

// message responses are carried back via oneshot channels.  this
// type eliminates quite a bit of boilerplate in the responder logic.
pub type DRMResp<T> = tokio::sync::oneshot::Sender<Result<T>>;

#[derive(Debug)]
pub enum DRM {
    Db(crate::db::msg::DbMsg),
    Photo(crate::photo::msg::PhotoMsg),
    Task(crate::task::msg::TaskMsg),
}

// service registry
//
// each service is instantiated once, and there is one message namespace.  all
// services are created (and thus registered) before any of them are started,
// so lookups during start() always see the complete set
#[derive(Clone, Debug)]
pub struct DRMRegistry(Arc<DashMap<ServiceType, DRMSender>>);

impl DRMRegistry {
    pub fn new() -> Self {
        DRMRegistry(Arc::new(DashMap::new()))
    }

    pub fn insert(&self, k: ServiceType, v: DRMSender) -> Result<()> {
        match self.0.insert(k.clone(), v) {
            None => Ok(()),
            Some(w) => {
                self.0.insert(k, w);
                Err(anyhow::Error::msg(
                    "internal error: a sender was added twice to the registry",
                ))
            }
        }
    }

    pub fn get(&self, k: &ServiceType) -> Result<DRMSender> {
        Ok(self
            .0
            .get(k)
            .ok_or_else(|| {
                anyhow::Error::msg(format!(
                    "internal error: a service was started without a necessary dependency ({k:?})"
                ))
            })?
            .clone())
    }
}

// send a message and wait for the reply
//
// the closure receives the response half of the oneshot and builds the message
// around it, so callers only ever see the result
pub async fn call<T, F>(sender: &DRMSender, build: F) -> Result<T>
where
    F: FnOnce(DRMResp<T>) -> DRM,
{
    let (tx, rx) = tokio::sync::oneshot::channel();

    sender.send(build(tx)).await?;

    rx.await?
}

// core service trait
//
// the DRInner abstraction holds basically all of the interesting state and
// leaves the outer part with just the config, receiver, and handles
#[async_trait]
pub trait DarkroomService: Send + Sync + 'static {
    type Inner: DRInner;

    fn create(config: Arc<DRConfig>, registry: &DRMRegistry) -> Result<Self>
    where
        Self: Sized;

    async fn start(&self, registry: &DRMRegistry) -> Result<()>;
}

// service message responder
//
// in the spirit of tower, the magic of the service model is in the message_handler
// rpc function.  services may respond to external messages on other channels (http) as well.
#[async_trait]
pub trait DRInner: Sized + Send + Sync + 'static {
    fn new(config: Arc<DRConfig>, registry: DRMRegistry) -> Result<Self>;

    fn registry(&self) -> DRMRegistry;

    async fn message_handler(&self, drm: DRM) -> Result<()>;

    // rather than have the inner service trait functions (i.e., the rpc calls) respond directly,
    // we define this helper function for use in the message_handler loop
    //
    // this is necessary so that the rpc functions can be used by each other without any weird
    // Option<resp> or the like
    async fn respond<T, Fut>(&self, resp: DRMResp<T>, fut: Fut) -> Result<()>
    where
        T: Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        resp.send(fut.await).map_err(|_| {
            anyhow::Error::msg(format!(
                "failed to respond to a {} message",
                std::any::type_name::<T>()
            ))
        })
    }
}

// the shared receive loop
//
// each message is handled on its own task, so a slow request (an upload, say)
// never holds up the queue behind it
pub fn spawn_message_loop<I: DRInner>(
    service: &'static str,
    receiver: Arc<Mutex<DRMReceiver>>,
    state: Arc<I>,
) -> JoinHandle<Result<()>> {
    let serve = async move {
        let mut receiver = receiver.lock().await;

        while let Some(msg) = receiver.recv().await {
            let state = Arc::clone(&state);
            tokio::task::spawn(async move {
                match state.message_handler(msg).await {
                    Ok(()) => (),
                    Err(err) => {
                        error!({service = service, channel = "drm", error = %err})
                    }
                }
            });
        }

        Err::<(), anyhow::Error>(anyhow::Error::msg("channel disconnected"))
    };

    tokio::task::spawn(serve)
}
