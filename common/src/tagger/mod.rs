use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use api::tag::Tag;

pub mod ark;
pub use ark::ArkTagger;

pub const DEFAULT_TIMEOUT: u64 = 20;
pub const DEFAULT_MAX_TAGS: usize = 5;
pub const MAX_TAGS_LIMIT: usize = 20;

// errors from a tagging provider
//
// Disabled and NotConfigured are kept apart so that callers can tell "the
// operator turned this off" from "the operator turned this on but forgot
// something", which surface as different messages to the user
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TaggerError {
    #[error("ai tagging is disabled")]
    Disabled,

    #[error("ai tagging is not configured: {0}")]
    NotConfigured(String),

    #[error("failed to read image for tagging: {0}")]
    Image(String),

    #[error("tagging provider failed: {0}")]
    Provider(String),
}

// anything that can look at an image and suggest tags for it
//
// implementations are chosen once, at startup, from the config file
#[async_trait]
pub trait ImageTagger: Send + Sync + 'static {
    async fn generate_tags(&self, path: &Path) -> Result<Vec<Tag>, TaggerError>;
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub enum TaggerBackend {
    // openai-compatible chat completions endpoint, as served by volcengine ark
    #[default]
    Ark,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub backend: TaggerBackend,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: String,

    // coarse categories suggested to the provider in the prompt
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,

    #[serde(default = "default_max_tags")]
    pub max_tags: usize,

    // seconds allowed for a single enrichment, queueing included
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_base_url() -> String {
    String::from("https://ark.cn-beijing.volces.com/api/v3")
}

fn default_model() -> String {
    String::from("doubao-seed-1-6-251015")
}

fn default_reasoning_effort() -> String {
    String::from("medium")
}

fn default_candidates() -> Vec<String> {
    [
        "landscape",
        "people",
        "animal",
        "plant",
        "architecture",
        "city",
        "indoor",
        "outdoor",
        "night",
        "food",
        "vehicle",
        "document",
        "screenshot",
        "illustration",
        "other",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_tags() -> usize {
    DEFAULT_MAX_TAGS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

impl Default for AiConfig {
    fn default() -> Self {
        AiConfig {
            enabled: false,
            backend: TaggerBackend::default(),
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            reasoning_effort: default_reasoning_effort(),
            candidates: default_candidates(),
            max_tags: default_max_tags(),
            timeout: default_timeout(),
        }
    }
}

impl AiConfig {
    // zero means "use the default" rather than "no time at all"
    pub fn timeout_secs(&self) -> u64 {
        if self.timeout == 0 {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        }
    }

    pub fn max_tags(&self) -> usize {
        match self.max_tags {
            0 => DEFAULT_MAX_TAGS,
            n => n.min(MAX_TAGS_LIMIT),
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

// shared handle to whichever tagger the config selected, or the reason there
// is none
pub type TaggerHandle = Result<Arc<dyn ImageTagger>, TaggerError>;

#[instrument(skip_all)]
pub fn create_tagger(config: &AiConfig) -> TaggerHandle {
    if !config.enabled {
        debug!("ai tagging disabled");
        return Err(TaggerError::Disabled);
    }

    if config.api_key().is_none() {
        return Err(TaggerError::NotConfigured(String::from("api_key is empty")));
    }

    match config.backend {
        TaggerBackend::Ark => {
            debug!({ model = config.model }, "creating ark tagger");
            Ok(Arc::new(ArkTagger::new(config)?))
        }
    }
}
