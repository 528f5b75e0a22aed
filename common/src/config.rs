use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, instrument};

use crate::{
    db::mariadb::MariaDbConfig,
    server::{DbConfig, FsConfig, HttpConfig, TaskConfig},
    tagger::AiConfig,
};

// darkroom configuration
//
// this struct contains all of the configuration options used by the server
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DRConfig {
    // core services
    pub fs: FsConfig,
    pub db: DbConfig,
    pub http: HttpConfig,
    #[serde(default)]
    pub task: TaskConfig,

    // enrichment
    #[serde(default)]
    pub ai: AiConfig,

    // backends
    pub mariadb: Option<MariaDbConfig>,
}

// in order to extract the config table from a larger document, we need to specify it
// as a subtable of the root node, i.e. a substruct
#[derive(Debug, Deserialize, Serialize)]
struct TomlConfigFile {
    config: DRConfig,
}

pub fn parse_config(doc: &str) -> anyhow::Result<DRConfig> {
    // the toml error carries the offending line, which may include secrets like
    // the api key, so only the location is kept
    let data: TomlConfigFile = toml::from_str(doc).map_err(|err| match err.span() {
        Some(span) => anyhow::Error::msg(format!("invalid config near byte {}", span.start)),
        None => anyhow::Error::msg("invalid config"),
    })?;

    Ok(data.config)
}

#[instrument(level=Level::DEBUG)]
pub async fn read_config(filename: PathBuf) -> anyhow::Result<Arc<DRConfig>> {
    debug!("reading config file");

    let doc = tokio::fs::read_to_string(&filename)
        .await
        .with_context(|| format!("failed to read config file {}", filename.display()))?;

    let config = parse_config(&doc)?;

    debug!("successfully parsed config file");
    Ok(Arc::new(config))
}
