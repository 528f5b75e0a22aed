use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// darkroom server configuration subtables
//
// split out of config.rs to keep the top-level struct readable; the backend
// specific tables live next to their backends
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FsConfig {
    // read-write directory holding originals, thumbnails and edits
    //
    // this directory is flat, and everything in it is served under /uploads
    pub upload_dir: PathBuf,

    // width of generated thumbnails, in pixels
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,
}

fn default_thumbnail_width() -> u32 {
    api::THUMBNAIL_WIDTH
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DbConfig {
    pub driver: DbDriver,

    // deadline, in seconds, applied to each round-trip to the metadata repository
    #[serde(default = "default_db_timeout")]
    pub timeout: u64,
}

fn default_db_timeout() -> u64 {
    10
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum DbDriver {
    MariaDB,
    // in-process store that does not survive a restart
    Memory,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HttpConfig {
    // ip and port for http server
    pub socket: String,

    // header set by the reverse proxy carrying the authenticated user
    #[serde(default = "default_user_header")]
    pub user_header: String,

    // largest accepted upload request, in mebibytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

fn default_user_header() -> String {
    String::from("x-forwarded-user")
}

fn default_max_upload_mb() -> usize {
    64
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TaskConfig {
    // maximum number of enrichment jobs talking to the tagging provider at once
    #[serde(default = "default_enrich_threads")]
    pub enrich_threads: usize,
}

fn default_enrich_threads() -> usize {
    4
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            enrich_threads: default_enrich_threads(),
        }
    }
}
