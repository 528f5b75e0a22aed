use serde::{Deserialize, Serialize};

// where a tag came from
//
// heuristic tags (file type, camera, etc.) share the marker with the tags
// returned by the tagging provider, since neither was typed by a person
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum TagSource {
    #[default]
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "AI")]
    Ai,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub source: TagSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Tag {
    pub fn user(name: impl Into<String>) -> Self {
        Tag {
            name: name.into(),
            source: TagSource::User,
            score: None,
        }
    }

    pub fn ai(name: impl Into<String>) -> Self {
        Tag {
            name: name.into(),
            source: TagSource::Ai,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

pub fn tag_names(tags: &[Tag]) -> Vec<&str> {
    tags.iter().map(|t| t.name.as_str()).collect()
}
