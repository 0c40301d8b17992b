use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::models::{
    AgentBookRecord, BookRecord, DetectOcrAgentResponse, DetectOcrResponse, GoogleBooksInfo,
};
use crate::services::google_books::GoogleBooksClient;
use crate::services::retry::{retry_with_policy, HttpFailure, RetryConfig};

/// What the agent believes a spine says.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleResolution {
    pub title: Option<String>,
    pub author: Option<String>,
    /// 0 - 100
    pub confidence: u8,
    pub reasoning: String,
}

/// Outcome of checking a resolved title against a book catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub found: bool,
    pub info: Option<GoogleBooksInfo>,
    pub note: Option<String>,
}

impl Verification {
    pub fn not_found(note: String) -> Self {
        Self {
            found: false,
            info: None,
            note: Some(note),
        }
    }
}

/// Turns noisy OCR text into a book title
#[async_trait]
pub trait TitleResolver: Send + Sync {
    async fn resolve(&self, book: &BookRecord) -> anyhow::Result<TitleResolution>;
    fn name(&self) -> &'static str;
}

/// Looks a title up in an external catalogue
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn verify(&self, title: &str, author: Option<&str>) -> Verification;
    fn name(&self) -> &'static str;
}

/// Takes the cleaned OCR text at face value.
pub struct OcrTextResolver;

impl OcrTextResolver {
    pub fn resolution_for(book: &BookRecord) -> TitleResolution {
        let text = book.text.trim();
        if text.is_empty() {
            return TitleResolution {
                title: None,
                author: None,
                confidence: 0,
                reasoning: "No text was recognized on this spine".to_string(),
            };
        }
        TitleResolution {
            title: Some(text.to_string()),
            author: None,
            confidence: (book.ocr_confidence * 0.8).round().clamp(0.0, 100.0) as u8,
            reasoning: format!(
                "Used the OCR text as the title ({:.1}% OCR confidence)",
                book.ocr_confidence
            ),
        }
    }
}

#[async_trait]
impl TitleResolver for OcrTextResolver {
    async fn resolve(&self, book: &BookRecord) -> anyhow::Result<TitleResolution> {
        Ok(Self::resolution_for(book))
    }

    fn name(&self) -> &'static str {
        "ocr-text"
    }
}

/// Chat-completions model asked to reconstruct title and author.
pub struct LlmTitleResolver {
    api_key: String,
    api_url: String,
    model: String,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl LlmTitleResolver {
    pub fn new(api_key: String, api_url: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key,
            api_url,
            model,
            client,
            retry: RetryConfig::default(),
        }
    }
}

fn build_resolution_prompt(book: &BookRecord) -> String {
    let fragments = book
        .text_detections
        .iter()
        .map(|d| format!("- \"{}\" ({:.1}%)", d.text, d.confidence))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"The following text was read by OCR from the spine of a single book on a shelf.
OCR may contain misread letters, missing words and fragments of the author name or publisher.

Combined text: "{}"
Fragments (with OCR confidence):
{}

Identify the book. Respond with a JSON object only:
{{"title": string or null, "author": string or null, "confidence": integer 0-100, "reasoning": short string}}"#,
        book.text, fragments
    )
}

#[derive(Debug, Deserialize)]
struct LlmAnswer {
    title: Option<String>,
    author: Option<String>,
    confidence: Option<f64>,
    reasoning: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null") && !v.eq_ignore_ascii_case("unknown"))
}

/// Reads the first JSON object of a model reply, ignoring prose or code
/// fences before and after it.
pub fn parse_resolution(content: &str) -> anyhow::Result<TitleResolution> {
    let start = content
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("No JSON object in model reply"))?;
    let answer: LlmAnswer = serde_json::Deserializer::from_str(&content[start..])
        .into_iter::<LlmAnswer>()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No JSON object in model reply"))??;

    let title = non_empty(answer.title);
    let confidence = if title.is_some() {
        answer.confidence.unwrap_or(0.0).round().clamp(0.0, 100.0) as u8
    } else {
        0
    };
    Ok(TitleResolution {
        title,
        author: non_empty(answer.author),
        confidence,
        reasoning: answer.reasoning.unwrap_or_default(),
    })
}

#[async_trait]
impl TitleResolver for LlmTitleResolver {
    async fn resolve(&self, book: &BookRecord) -> anyhow::Result<TitleResolution> {
        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a librarian who identifies books from partial, noisy spine text."
                },
                {
                    "role": "user",
                    "content": build_resolution_prompt(book)
                }
            ],
            "temperature": 0.1,
            "max_tokens": 300,
            "response_format": { "type": "json_object" }
        });

        let client = &self.client;
        let url = self.api_url.as_str();
        let auth = format!("Bearer {}", self.api_key);
        let auth = auth.as_str();
        let body = &request_body;

        let result: Value = retry_with_policy(
            &self.retry,
            "Title resolution",
            move || async move {
                let response = client
                    .post(url)
                    .header("Authorization", auth)
                    .json(body)
                    .send()
                    .await
                    .map_err(HttpFailure::from_reqwest)?;
                let status = response.status();
                if !status.is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(HttpFailure::from_status(status, &error_text));
                }
                response
                    .json::<Value>()
                    .await
                    .map_err(|e| HttpFailure::Permanent(format!("invalid response: {}", e)))
            },
            HttpFailure::decision,
        )
        .await
        .map_err(|e| anyhow::anyhow!("LLM API error: {}", e))?;

        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid response format"))?;
        debug!("Model reply for book {}: {}", book.book_id, content);

        parse_resolution(content)
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Resolves OCR text to titles and verifies them against Google Books.
pub struct AgentService {
    resolver: Box<dyn TitleResolver>,
    lookup: Box<dyn MetadataLookup>,
}

impl AgentService {
    pub fn new(config: &AgentConfig) -> Self {
        let resolver: Box<dyn TitleResolver> = match &config.llm_api_key {
            Some(key) => Box::new(LlmTitleResolver::new(
                key.clone(),
                config.llm_api_url.clone(),
                config.llm_model.clone(),
            )),
            None => {
                info!("No LLM API key configured, titles will come from OCR text");
                Box::new(OcrTextResolver)
            }
        };
        Self::with_parts(resolver, Box::new(GoogleBooksClient::new(config)))
    }

    pub fn with_parts(resolver: Box<dyn TitleResolver>, lookup: Box<dyn MetadataLookup>) -> Self {
        info!(
            "Agent using resolver '{}' and lookup '{}'",
            resolver.name(),
            lookup.name()
        );
        Self { resolver, lookup }
    }

    pub async fn resolve_book(&self, book: BookRecord) -> AgentBookRecord {
        if book.text.trim().is_empty() {
            let resolution = OcrTextResolver::resolution_for(&book);
            return AgentBookRecord {
                book,
                resolved_title: None,
                resolved_author: None,
                agent_confidence: 0,
                agent_reasoning: Some(resolution.reasoning),
                google_books_found: false,
                google_books_info: None,
                google_books_verification: None,
            };
        }

        let resolution = match self.resolver.resolve(&book).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(
                    "Resolver '{}' failed for book {}: {}. Falling back to OCR text",
                    self.resolver.name(),
                    book.book_id,
                    e
                );
                OcrTextResolver::resolution_for(&book)
            }
        };

        let Some(title) = resolution.title.clone() else {
            return AgentBookRecord {
                book,
                resolved_title: None,
                resolved_author: resolution.author,
                agent_confidence: 0,
                agent_reasoning: Some(resolution.reasoning),
                google_books_found: false,
                google_books_info: None,
                google_books_verification: Some("No title to look up".to_string()),
            };
        };

        let verification = self
            .lookup
            .verify(&title, resolution.author.as_deref())
            .await;
        let resolved_author = resolution.author.or_else(|| {
            verification
                .info
                .as_ref()
                .and_then(|info| info.authors.first().cloned())
        });

        AgentBookRecord {
            book,
            resolved_title: Some(title),
            resolved_author,
            agent_confidence: resolution.confidence,
            agent_reasoning: Some(resolution.reasoning).filter(|r| !r.is_empty()),
            google_books_found: verification.found,
            google_books_info: verification.info,
            google_books_verification: verification.note,
        }
    }

    /// Runs the agent over every book in order. Books are handled one at a
    /// time to stay inside external rate limits.
    pub async fn resolve_all(&self, response: DetectOcrResponse) -> DetectOcrAgentResponse {
        let mut books = Vec::with_capacity(response.books.len());
        for book in response.books {
            books.push(self.resolve_book(book).await);
        }
        let found = books.iter().filter(|b| b.google_books_found).count();
        info!("Agent verified {}/{} books", found, books.len());

        DetectOcrAgentResponse {
            num_books: response.num_books,
            original_image: response.original_image,
            annotated_image: response.annotated_image,
            books,
        }
    }
}
