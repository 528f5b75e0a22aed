use std::{path::Path, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    tagger::{AiConfig, ImageTagger, TaggerError},
    tags::merge_tags,
};
use api::tag::Tag;

// providers refuse large payloads, and thumbnails are well under this
const MAX_IMAGE_BYTES: u64 = 8 * 1024 * 1024;

const ERROR_BODY_LIMIT: usize = 800;

// openai-compatible chat completions tagger
//
// the image is inlined as a base64 data url and the model is asked to answer
// with a small json document listing tags and optional confidence scores
pub struct ArkTagger {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    reasoning_effort: String,
    prompt: String,
}

impl ArkTagger {
    pub fn new(config: &AiConfig) -> Result<Self, TaggerError> {
        let api_key = config
            .api_key()
            .ok_or_else(|| TaggerError::NotConfigured(String::from("api_key is empty")))?
            .to_owned();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs()))
            .build()
            .map_err(|err| TaggerError::NotConfigured(err.to_string()))?;

        let base_url = config.base_url.trim().trim_end_matches('/');

        Ok(ArkTagger {
            client,
            api_key,
            endpoint: format!("{base_url}/chat/completions"),
            model: config.model.trim().to_owned(),
            reasoning_effort: config.reasoning_effort.trim().to_owned(),
            prompt: build_prompt(&config.candidates, config.max_tags()),
        })
    }
}

#[async_trait]
impl ImageTagger for ArkTagger {
    #[instrument(skip(self))]
    async fn generate_tags(&self, path: &Path) -> Result<Vec<Tag>, TaggerError> {
        let (bytes, mime) = read_image(path).await?;

        debug!({ size = bytes.len(), mime = mime }, "sending image to provider");

        let data_url = format!("data:{mime};base64,{}", STANDARD.encode(&bytes));

        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                    ContentPart::Text { text: &self.prompt },
                ],
            }],
            temperature: 0.2,
            reasoning_effort: Some(self.reasoning_effort.as_str()).filter(|r| !r.is_empty()),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| TaggerError::Provider(format!("request failed: {err}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| TaggerError::Provider(format!("failed to read response: {err}")))?;

        if !status.is_success() {
            return Err(TaggerError::Provider(format!(
                "status={status} body={}",
                truncate(&text, ERROR_BODY_LIMIT)
            )));
        }

        let tags = parse_response(&text)?;

        debug!({ count = tags.len() }, "provider returned tags");

        Ok(tags)
    }
}

fn build_prompt(candidates: &[String], max_tags: usize) -> String {
    let list = candidates
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(", ");

    let list = if list.is_empty() {
        String::from("landscape, people, animal, architecture, food, vehicle, document, screenshot, other")
    } else {
        list
    };

    format!(
        "Generate 1 to {max_tags} short tags describing this image. Cover a broad category \
         (for example: {list}) as well as finer-grained subjects or scenes (for example: beach, \
         mountain, dog, cat, night, indoor). Tags are not limited to the examples; use short \
         words rather than sentences and do not repeat yourself.\n\
         Reply with JSON only and no explanation, in the form \
         {{\"tags\":[{{\"name\":\"people\",\"score\":0.95}}]}}.\n\
         score is an optional confidence between 0 and 1."
    )
}

async fn read_image(path: &Path) -> Result<(Vec<u8>, String), TaggerError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|err| TaggerError::Image(err.to_string()))?;

    if metadata.is_dir() {
        return Err(TaggerError::Image(format!(
            "{} is a directory",
            path.display()
        )));
    }

    if metadata.len() > MAX_IMAGE_BYTES {
        return Err(TaggerError::Image(format!(
            "image too large for tagging: {} bytes (max {MAX_IMAGE_BYTES})",
            metadata.len()
        )));
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| TaggerError::Image(err.to_string()))?;

    // sniff the content first, since the extension came from a client
    let mime = match image::guess_format(&bytes) {
        Ok(format) => format.to_mime_type().to_owned(),
        Err(_) => mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_owned(),
    };

    Ok((bytes, mime))
}

pub(crate) fn parse_response(body: &str) -> Result<Vec<Tag>, TaggerError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|err| TaggerError::Provider(format!("failed to parse response: {err}")))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| TaggerError::Provider(String::from("response has no choices")))?;

    parse_content(&content)
}

fn parse_content(content: &str) -> Result<Vec<Tag>, TaggerError> {
    let content = strip_code_fence(content.trim());
    if content.is_empty() {
        return Err(TaggerError::Provider(String::from("empty content")));
    }

    let output: TaggerOutput = serde_json::from_str(content).map_err(|err| {
        TaggerError::Provider(format!(
            "failed to parse tag json: {err} (content={})",
            truncate(content, 400)
        ))
    })?;

    let tags = output
        .tags
        .into_iter()
        .map(|item| {
            let tag = Tag::ai(item.name);
            match item.score {
                Some(score) if score > 0.0 && score <= 1.0 => tag.with_score(score),
                _ => tag,
            }
        })
        .collect::<Vec<_>>();

    // normalises names and drops duplicates the model repeated
    Ok(merge_tags(&[], &tags))
}

// models sometimes wrap their json in a markdown fence despite being asked not to
fn strip_code_fence(content: &str) -> &str {
    let Some(inner) = content.strip_prefix("```") else {
        return content;
    };

    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn truncate(s: &str, n: usize) -> String {
    match s.char_indices().nth(n) {
        Some((idx, _)) => format!("{}...(truncated)", &s[..idx]),
        None => s.to_owned(),
    }
}

// wire types

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    ImageUrl { image_url: ImageUrl },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TaggerOutput {
    #[serde(default)]
    tags: Vec<TaggerOutputTag>,
}

#[derive(Deserialize)]
struct TaggerOutputTag {
    name: String,
    #[serde(default)]
    score: Option<f64>,
}
