pub mod debug;
pub mod detection;
pub mod index;
pub mod upload;

pub use debug::*;
pub use detection::*;
pub use index::*;
pub use upload::*;

use actix_web::web;
use tokio::sync::OwnedMutexGuard;

/// Serializes every request that reads or writes the shared upload and
/// debug files.
pub type WorkspaceLock = tokio::sync::Mutex<()>;

/// Owned guard over the workspace. Handlers move it into their blocking
/// task so the lock outlives a dropped request future.
pub async fn acquire_workspace(lock: web::Data<WorkspaceLock>) -> OwnedMutexGuard<()> {
    lock.into_inner().lock_owned().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::{configure_routes, cors_headers};
    use crate::services::agent::{MetadataLookup, OcrTextResolver, Verification};
    use crate::models::{Detection, DetectionParams};
    use crate::services::pipeline::tests::{jpeg_bytes, pipeline, FixedRecognizer};
    use crate::services::{AgentService, BookDetector, FileService, Pipeline};
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, web, App};
    use async_trait::async_trait;
    use image::DynamicImage;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct NoLookup;

    #[async_trait]
    impl MetadataLookup for NoLookup {
        async fn verify(&self, title: &str, _author: Option<&str>) -> Verification {
            Verification::not_found(format!("No Google Books result for \"{}\"", title))
        }
        fn name(&self) -> &'static str {
            "none"
        }
    }

    macro_rules! test_app {
        ($dir:expr, $config:expr) => {
            test::init_service(
                App::new()
                    .wrap(cors_headers())
                    .app_data(web::Data::new(templates().unwrap()))
                    .app_data(web::Data::new($config))
                    .app_data(web::Data::new(pipeline($dir)))
                    .app_data(web::Data::new(AgentService::with_parts(
                        Box::new(OcrTextResolver),
                        Box::new(NoLookup),
                    )))
                    .app_data(web::Data::new(WorkspaceLock::default()))
                    .configure(configure_routes),
            )
            .await
        };
    }

    const BOUNDARY: &str = "----biblioscan-test";

    fn multipart(filename: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: image/jpeg\r\n\r\n",
            BOUNDARY, filename
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/upload")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    #[actix_web::test]
    async fn test_healthz_and_cors() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(dir.path(), Config::with_workspace(dir.path()));

        let resp = test::call_service(&app, test::TestRequest::get().uri("/healthz").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(test::read_body(resp).await, "OK");
    }

    #[actix_web::test]
    async fn test_index_renders_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_workspace(dir.path());
        config.default_conf = 0.45;
        let app = test_app!(dir.path(), config);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains("BiblioScan"));
        assert!(body.contains("value=\"0.45\""));
    }

    #[actix_web::test]
    async fn test_detect_without_upload_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(dir.path(), Config::with_workspace(dir.path()));

        let resp = test::call_service(&app, test::TestRequest::post().uri("/detect").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("No image uploaded"));
    }

    #[actix_web::test]
    async fn test_upload_then_detect() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(dir.path(), Config::with_workspace(dir.path()));

        let resp = test::call_service(&app, upload_request(multipart("shelf.jpg", &jpeg_bytes())).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["filename"], "shelf.jpg");
        assert_eq!(body["original_image"], "/debug_crops/original.jpg");

        let req = test::TestRequest::post().uri("/detect?conf=0.85").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["num_books"], 1);
        assert_eq!(body["detections"][0]["bbox"], serde_json::json!([60, 5, 90, 70]));

        let req = test::TestRequest::get().uri("/debug_crops/annotated.jpg").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_upload_rejects_empty_and_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_workspace(dir.path());
        config.max_upload_bytes = 16;
        let app = test_app!(dir.path(), config);

        let resp = test::call_service(&app, upload_request(multipart("empty.jpg", b"")).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(&app, upload_request(multipart("big.jpg", &[7u8; 64])).to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!dir.path().join("uploaded.jpg").exists());
    }

    #[actix_web::test]
    async fn test_debug_traversal_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(dir.path(), Config::with_workspace(dir.path()));
        test::call_service(&app, upload_request(multipart("shelf.jpg", &jpeg_bytes())).to_request()).await;

        for uri in ["/debug_crops/../uploaded.jpg", "/debug_crops/%2E%2E%2Fuploaded.jpg", "/debug_crops/nope.jpg"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn test_agent_endpoint_adds_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(dir.path(), Config::with_workspace(dir.path()));
        test::call_service(&app, upload_request(multipart("shelf.jpg", &jpeg_bytes())).to_request()).await;

        let req = test::TestRequest::post().uri("/detect_and_ocr_and_agent").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["num_books"], 2);

        let book = &body["books"][0];
        assert_eq!(book["text"], "Dune Messiah");
        assert_eq!(book["resolved_title"], "Dune Messiah");
        assert_eq!(book["google_books_found"], false);
        assert_eq!(book["ocr_quality"], "Excellent");
        assert!(book["google_books_verification"].as_str().unwrap().contains("Dune Messiah"));
    }

    #[actix_web::test]
    async fn test_detect_and_ocr_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(dir.path(), Config::with_workspace(dir.path()));
        test::call_service(&app, upload_request(multipart("shelf.jpg", &jpeg_bytes())).to_request()).await;

        let req = test::TestRequest::post().uri("/detect_and_ocr?conf=0.85&iou=0.4").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["num_books"], 1);
        let book = &body["books"][0];
        assert_eq!(book["book_id"], 0);
        assert_eq!(book["text"], "Dune Messiah");
        assert_eq!(book["ocr_confidence"], 91.0);
        assert_eq!(book["num_text_detections"], 2);
        assert_eq!(book["crop_image"], "/debug_crops/book_0.jpg");
        assert!(book.get("resolved_title").is_none());

        let req = test::TestRequest::get().uri("/debug_crops/book_0_ocr.jpg").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    /// Blocks inside inference long enough for the client to give up.
    struct SlowDetector {
        finished: Arc<AtomicBool>,
    }

    impl BookDetector for SlowDetector {
        fn detect(&self, _image: &DynamicImage, _params: DetectionParams) -> anyhow::Result<Vec<Detection>> {
            std::thread::sleep(Duration::from_millis(500));
            self.finished.store(true, Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[actix_web::test]
    async fn test_cancelled_request_keeps_workspace_locked() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileService::new(dir.path().join("uploaded.jpg"), dir.path().join("debug_crops"));
        files.store_upload(&jpeg_bytes()).unwrap();

        let finished = Arc::new(AtomicBool::new(false));
        let slow = Pipeline::new(
            Arc::new(SlowDetector { finished: finished.clone() }),
            Arc::new(FixedRecognizer),
            files,
        );
        let lock = web::Data::new(WorkspaceLock::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Config::with_workspace(dir.path())))
                .app_data(web::Data::new(slow))
                .app_data(lock.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/detect").to_request();
        let outcome = tokio::time::timeout(Duration::from_millis(100), test::call_service(&app, req)).await;
        assert!(outcome.is_err(), "request should still be running");

        assert!(!finished.load(Ordering::SeqCst));
        assert!(lock.try_lock().is_err(), "workspace released while the detector is running");

        let _guard = lock.lock().await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(dir.path().join("debug_crops/annotated.jpg").exists());
    }
}
