pub mod photo;
pub mod search;
pub mod tag;
pub mod task;

// public url prefix under which the content store is served
//
// records only ever carry paths below this prefix, and the server strips them
// back down to a bare filename before touching the disk
pub const UPLOAD_PATH: &str = "/uploads";

// thumbnails are resized to this width unless the config says otherwise
pub const THUMBNAIL_WIDTH: u32 = 400;

// the http endpoints all live under this prefix
pub const API_PATH: &str = "/api";

pub fn upload_url(filename: &str) -> String {
    format!("{UPLOAD_PATH}/{filename}")
}
