use std::sync::Arc;

use anyhow::{Context, Result};
use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, StatusCode},
    middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{Level, debug, info, instrument};

use crate::http::{
    api::*,
    auth::{ProxyAuthData, hide_dotfiles, proxy_auth},
};
use crate::photo::PhotoClient;
use crate::service::{DRInner, DRM, DRMRegistry, DRMSender, DarkroomService, ServiceType};
use api::{API_PATH, UPLOAD_PATH};
use common::config::DRConfig;

// http frontend
//
// unlike the other services, nothing sends messages to the http service, so
// it never registers a sender; it only holds clients for the services behind it
pub struct HttpService {
    config: Arc<DRConfig>,
    handle: AsyncCell<tokio::task::JoinHandle<Result<()>>>,
}

#[async_trait]
impl DarkroomService for HttpService {
    type Inner = HttpEndpoint;

    fn create(config: Arc<DRConfig>, _registry: &DRMRegistry) -> Result<Self> {
        Ok(HttpService {
            config: config.clone(),
            handle: AsyncCell::new(),
        })
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &DRMRegistry) -> Result<()> {
        info!("starting http service");

        let state = Arc::new(HttpEndpoint::new(self.config.clone(), registry.clone())?);

        let router = build_router(&self.config, state)?;

        // bind here rather than in the spawned task so that a busy socket
        // fails startup instead of a background task
        let listener = TcpListener::bind(&self.config.http.socket)
            .await
            .with_context(|| format!("failed to bind {}", self.config.http.socket))?;

        info!({ socket = %self.config.http.socket }, "http service listening");

        let serve = async move {
            axum::serve(listener, router).await?;

            Err::<(), anyhow::Error>(anyhow::Error::msg("http server exited"))
        };

        self.handle.set(tokio::task::spawn(serve));

        debug!("started http service");
        Ok(())
    }
}

pub struct HttpEndpoint {
    registry: DRMRegistry,
    pub(super) photos: PhotoClient,
    pub(super) task_sender: DRMSender,
}

#[async_trait]
impl DRInner for HttpEndpoint {
    fn new(_config: Arc<DRConfig>, registry: DRMRegistry) -> Result<Self> {
        Ok(HttpEndpoint {
            photos: PhotoClient::new(&registry)?,
            task_sender: registry.get(&ServiceType::Task)?,
            registry,
        })
    }

    fn registry(&self) -> DRMRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, _drm: DRM) -> Result<()> {
        Err(anyhow::Error::msg("not implemented"))
    }
}

fn build_router(config: &DRConfig, state: Arc<HttpEndpoint>) -> Result<Router> {
    let auth_data = ProxyAuthData {
        header_key: HeaderName::from_bytes(config.http.user_header.trim().to_lowercase().as_bytes())
            .context("invalid http.user_header")?,
    };

    let upload_limit = DefaultBodyLimit::max(config.http.max_upload_mb.max(1) * 1024 * 1024);

    let api_router = Router::new()
        .route(
            "/photos",
            post(upload_photo)
                .layer(upload_limit)
                .get(search_photos),
        )
        .route(
            "/photos/{photo_uuid}",
            get(get_photo).patch(update_photo).delete(delete_photo),
        )
        .route("/photos/{photo_uuid}/edit", post(edit_photo))
        .route("/photos/{photo_uuid}/tags", post(generate_tags))
        .route("/status", get(status))
        .route_layer(middleware::from_fn_with_state(auth_data, proxy_auth))
        .with_state(state);

    // stored files are served as-is and sit outside the proxy header check,
    // apart from the hidden ones
    let router = Router::new()
        .nest(API_PATH, api_router)
        .nest_service(UPLOAD_PATH, ServeDir::new(&config.fs.upload_dir))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(middleware::from_fn(hide_dotfiles))
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
