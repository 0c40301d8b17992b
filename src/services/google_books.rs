use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::constants::TITLE_MATCH_THRESHOLD;
use crate::models::GoogleBooksInfo;
use crate::services::agent::{MetadataLookup, Verification};
use crate::services::retry::{retry_with_policy, HttpFailure, RetryConfig};

/// Client for the Google Books volumes search API
#[derive(Clone)]
pub struct GoogleBooksClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    volume_info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VolumeInfo {
    title: Option<String>,
    subtitle: Option<String>,
    authors: Vec<String>,
    publisher: Option<String>,
    published_date: Option<String>,
    categories: Vec<String>,
    average_rating: Option<f32>,
    ratings_count: Option<u32>,
    page_count: Option<u32>,
    info_link: Option<String>,
    image_links: Option<ImageLinks>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageLinks {
    thumbnail: Option<String>,
}

impl From<VolumeInfo> for GoogleBooksInfo {
    fn from(info: VolumeInfo) -> Self {
        let title = match (info.title, info.subtitle) {
            (Some(title), Some(subtitle)) => format!("{}: {}", title, subtitle),
            (Some(title), None) => title,
            (None, _) => String::new(),
        };
        Self {
            title,
            authors: info.authors,
            publisher: info.publisher,
            published_date: info.published_date,
            categories: info.categories,
            average_rating: info.average_rating.unwrap_or(0.0),
            ratings_count: info.ratings_count.unwrap_or(0),
            page_count: info.page_count,
            info_link: info.info_link,
            thumbnail: info.image_links.and_then(|l| l.thumbnail),
        }
    }
}

impl GoogleBooksClient {
    pub fn new(config: &AgentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: config.google_books_url.clone(),
            api_key: config.google_books_api_key.clone(),
            retry: RetryConfig::default(),
        }
    }

    pub fn search_url(&self, title: &str, author: Option<&str>) -> String {
        let mut url = format!(
            "{}?q={}&maxResults=5&printType=books",
            self.base_url,
            urlencoding::encode(&build_query(title, author))
        );
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&key={}", urlencoding::encode(key)));
        }
        url
    }

    pub async fn search(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Vec<GoogleBooksInfo>, HttpFailure> {
        let url = self.search_url(title, author);
        debug!("Google Books lookup: {}", build_query(title, author));

        let client = &self.client;
        let url = url.as_str();
        let body: VolumesResponse = retry_with_policy(
            &self.retry,
            "Google Books search",
            move || async move {
                let resp = client.get(url).send().await.map_err(HttpFailure::from_reqwest)?;
                let status = resp.status();
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    return Err(HttpFailure::from_status(status, &text));
                }
                resp.json::<VolumesResponse>()
                    .await
                    .map_err(|e| HttpFailure::Permanent(format!("invalid response: {}", e)))
            },
            HttpFailure::decision,
        )
        .await?;

        Ok(body
            .items
            .into_iter()
            .map(|v| GoogleBooksInfo::from(v.volume_info))
            .filter(|info| !info.title.is_empty())
            .collect())
    }
}

#[async_trait]
impl MetadataLookup for GoogleBooksClient {
    async fn verify(&self, title: &str, author: Option<&str>) -> Verification {
        let candidates = match self.search(title, author).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Google Books lookup for {:?} failed: {}", title, e);
                return Verification::not_found(format!("Google Books lookup failed: {}", e));
            }
        };
        verification_from_candidates(title, candidates)
    }

    fn name(&self) -> &'static str {
        "google-books"
    }
}

/// `intitle:` query, narrowed with `inauthor:` when an author is known.
pub fn build_query(title: &str, author: Option<&str>) -> String {
    match author.map(str::trim).filter(|a| !a.is_empty()) {
        Some(author) => format!("intitle:{} inauthor:{}", title.trim(), author),
        None => format!("intitle:{}", title.trim()),
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity between a resolved title and a candidate, 0..1. A candidate
/// whose main title (before any subtitle) matches scores as well as a full
/// match.
pub fn title_similarity(query: &str, candidate: &str) -> f64 {
    let query = normalize(query);
    let full = strsim::normalized_levenshtein(&query, &normalize(candidate));
    let main = candidate
        .split(':')
        .next()
        .map(|t| strsim::normalized_levenshtein(&query, &normalize(t)))
        .unwrap_or(0.0);
    full.max(main)
}

pub fn best_match(title: &str, candidates: Vec<GoogleBooksInfo>) -> Option<(GoogleBooksInfo, f64)> {
    candidates
        .into_iter()
        .map(|c| {
            let score = title_similarity(title, &c.title);
            (c, score)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

pub fn verification_from_candidates(title: &str, candidates: Vec<GoogleBooksInfo>) -> Verification {
    match best_match(title, candidates) {
        None => Verification::not_found(format!("No Google Books result for \"{}\"", title)),
        Some((info, score)) if score >= TITLE_MATCH_THRESHOLD => Verification {
            found: true,
            info: Some(info),
            note: None,
        },
        Some((info, score)) => Verification::not_found(format!(
            "No confident match for \"{}\".\nClosest result: \"{}\"{} (similarity {:.0}%)",
            title,
            info.title,
            if info.authors.is_empty() {
                String::new()
            } else {
                format!(" by {}", info.authors.join(", "))
            },
            score * 100.0
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{web, App, HttpResponse, HttpServer};
    use std::collections::HashMap;

    fn info(title: &str) -> GoogleBooksInfo {
        GoogleBooksInfo {
            title: title.to_string(),
            authors: vec!["Frank Herbert".to_string()],
            ..Default::default()
        }
    }

    fn config(google_books_url: String) -> AgentConfig {
        AgentConfig {
            llm_api_key: None,
            llm_api_url: String::new(),
            llm_model: String::new(),
            google_books_api_key: None,
            google_books_url,
        }
    }

    async fn volumes(query: web::Query<HashMap<String, String>>) -> HttpResponse {
        if query.get("q").map(String::as_str) != Some("intitle:Dune Messiah inauthor:Frank Herbert") {
            return HttpResponse::Ok().json(serde_json::json!({ "totalItems": 0 }));
        }
        HttpResponse::Ok().json(serde_json::json!({
            "totalItems": 2,
            "items": [
                { "volumeInfo": { "title": "Children of Dune", "authors": ["Frank Herbert"] } },
                { "volumeInfo": {
                    "title": "Dune Messiah",
                    "authors": ["Frank Herbert"],
                    "publisher": "Ace",
                    "pageCount": 336
                } },
                { "volumeInfo": { "authors": ["Nobody"] } }
            ]
        }))
    }

    /// Local volumes endpoint plus one that always rejects; returns the base URL.
    fn start_books_server() -> String {
        let server = HttpServer::new(|| {
            App::new()
                .route("/volumes", web::get().to(volumes))
                .route("/rejecting", web::get().to(|| async { HttpResponse::BadRequest().body("bad query") }))
        })
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        format!("http://{}", addr)
    }

    #[actix_web::test]
    async fn test_search_and_verify_over_http() {
        let base = start_books_server();
        let client = GoogleBooksClient::new(&config(format!("{}/volumes", base)));

        let candidates = client.search("Dune Messiah", Some("Frank Herbert")).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].publisher.as_deref(), Some("Ace"));

        let verification = client.verify("Dune Messiah", Some("Frank Herbert")).await;
        assert!(verification.found);
        assert_eq!(verification.info.unwrap().page_count, Some(336));

        let unknown = client.verify("The Hobbit", None).await;
        assert!(!unknown.found);
        assert!(unknown.note.unwrap().contains("No Google Books result"));
    }

    #[actix_web::test]
    async fn test_rejected_lookup_becomes_a_note() {
        let base = start_books_server();
        let client = GoogleBooksClient::new(&config(format!("{}/rejecting", base)));

        assert!(client.search("Dune", None).await.is_err());
        let verification = client.verify("Dune", None).await;
        assert!(!verification.found);
        assert!(verification.info.is_none());
        assert!(verification.note.unwrap().contains("lookup failed"));
    }

    #[test]
    fn test_build_query() {
        assert_eq!(build_query(" Dune ", None), "intitle:Dune");
        assert_eq!(build_query("Dune", Some("Herbert")), "intitle:Dune inauthor:Herbert");
        assert_eq!(build_query("Dune", Some("  ")), "intitle:Dune");
    }

    #[test]
    fn test_search_url_encodes_query() {
        let client = GoogleBooksClient::new(&AgentConfig {
            llm_api_key: None,
            llm_api_url: String::new(),
            llm_model: String::new(),
            google_books_api_key: Some("k".to_string()),
            google_books_url: "https://books.test/volumes".to_string(),
        });
        assert_eq!(
            client.search_url("Dune Messiah", None),
            "https://books.test/volumes?q=intitle%3ADune%20Messiah&maxResults=5&printType=books&key=k"
        );
    }

    #[test]
    fn test_subtitle_does_not_hurt_similarity() {
        assert!(title_similarity("dune", "Dune: Deluxe Edition") > 0.99);
        assert!(title_similarity("The Hobbit", "Dune") < 0.5);
    }

    #[test]
    fn test_verification_threshold() {
        let found = verification_from_candidates("Dune Mesiah", vec![info("Children of Dune"), info("Dune Messiah")]);
        assert!(found.found);
        assert_eq!(found.info.unwrap().title, "Dune Messiah");

        let weak = verification_from_candidates("Hobbit", vec![info("Dune Messiah")]);
        assert!(!weak.found);
        assert!(weak.note.unwrap().contains("Closest result: \"Dune Messiah\" by Frank Herbert"));

        let none = verification_from_candidates("Hobbit", vec![]);
        assert!(!none.found && none.info.is_none());
    }

    #[test]
    fn test_volume_info_conversion() {
        let raw = r#"{"items":[{"volumeInfo":{"title":"Dune","subtitle":"Deluxe","authors":["Frank Herbert"],"averageRating":4.5,"ratingsCount":10,"imageLinks":{"thumbnail":"http://img"}}}]}"#;
        let parsed: VolumesResponse = serde_json::from_str(raw).unwrap();
        let info = GoogleBooksInfo::from(parsed.items.into_iter().next().unwrap().volume_info);
        assert_eq!(info.title, "Dune: Deluxe");
        assert_eq!(info.ratings_count, 10);
        assert_eq!(info.thumbnail.as_deref(), Some("http://img"));
        assert!(info.categories.is_empty());
    }
}
