use serde::{Deserialize, Serialize};

use crate::photo::PhotoRecord;

pub const DEFAULT_PAGE_LIMIT: u64 = 20;
pub const MAX_PAGE_LIMIT: u64 = 100;

// filter for listing a user's photos
//
// query is a case-insensitive substring match against the title, description,
// and tag names; tag must match a tag name exactly (ignoring case); start and
// end bound the creation time, inclusive
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PhotoFilter {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
    #[serde(default = "first_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn first_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    DEFAULT_PAGE_LIMIT
}

impl Default for PhotoFilter {
    fn default() -> Self {
        PhotoFilter {
            query: String::new(),
            tag: None,
            start: None,
            end: None,
            page: first_page(),
            limit: default_limit(),
        }
    }
}

impl PhotoFilter {
    // clamp paging to sane values, mirroring what the http layer accepts
    pub fn normalized(mut self) -> Self {
        self.query = self.query.trim().to_owned();
        self.tag = self
            .tag
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());

        if self.page < 1 {
            self.page = 1;
        }

        self.limit = match self.limit {
            0 => DEFAULT_PAGE_LIMIT,
            l if l > MAX_PAGE_LIMIT => MAX_PAGE_LIMIT,
            l => l,
        };

        self
    }

    // saturates rather than wrapping, so an absurd page is simply past the end
    pub fn offset(&self) -> u64 {
        (self.page.max(1) - 1).saturating_mul(self.limit)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SearchPhotosResp {
    pub photos: Vec<PhotoRecord>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}
