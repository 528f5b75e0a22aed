pub mod config;
pub mod db;
pub mod media;
pub mod server;
pub mod store;
pub mod tagger;
pub mod tags;

// current time as a unix timestamp, used for ctime/mtime on records
pub fn unix_time() -> i64 {
    chrono::Local::now().timestamp()
}
