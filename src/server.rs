use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::{web, App, HttpServer};
use log::info;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::constants::DEBUG_ROUTE;
use crate::handlers::{self, WorkspaceLock};
use crate::services::{AgentService, FileService, PaddleOcrEngine, Pipeline, YoloDetector};

/// Loads both models and wires them to the configured workspace.
pub fn build_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let started = Instant::now();
    let detector = YoloDetector::new(&config.detector)?;
    let recognizer = PaddleOcrEngine::new(&config.ocr)?;
    info!("Models loaded in {:?}", started.elapsed());

    Ok(Pipeline::new(
        Arc::new(detector),
        Arc::new(recognizer),
        FileService::new(config.upload_path.clone(), config.debug_dir.clone()),
    ))
}

pub async fn run(config: Config) -> std::io::Result<()> {
    let host = config.host.clone();
    let port = config.port;

    let pipeline = build_pipeline(&config).map_err(|e| std::io::Error::other(format!("{:#}", e)))?;
    let tera = handlers::templates().map_err(std::io::Error::other)?;

    let pipeline = web::Data::new(pipeline);
    let agent = web::Data::new(AgentService::new(&config.agent));
    let lock = web::Data::new(WorkspaceLock::default());
    let tera = web::Data::new(tera);
    let config = web::Data::new(config);

    print_banner(&host, port);
    info!("Server running at http://{}:{}/", host, port);
    let startup_time = Instant::now();

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(cors_headers())
            .app_data(tera.clone())
            .app_data(config.clone())
            .app_data(pipeline.clone())
            .app_data(agent.clone())
            .app_data(lock.clone())
            .configure(configure_routes)
    })
    .bind((host, port))?
    .run()
    .await?;

    info!("Server stopped. Uptime: {:?}", startup_time.elapsed());
    Ok(())
}

/// Lets any origin call the API.
pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "GET, POST, OPTIONS"))
        .add(("Access-Control-Allow-Headers", "*"))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::index))
        .route("/upload", web::post().to(handlers::upload))
        .route("/detect", web::post().to(handlers::detect))
        .route("/detect_and_ocr", web::post().to(handlers::detect_and_ocr))
        .route(
            "/detect_and_ocr_and_agent",
            web::post().to(handlers::detect_and_ocr_and_agent),
        )
        .route(
            &format!("{}/{{filename:.*}}", DEBUG_ROUTE),
            web::get().to(handlers::serve_debug_file),
        )
        .route("/healthz", web::get().to(|| async { "OK" }));
}

fn print_banner(host: &str, port: u16) {
    let banner = r#"
 ____  _ _     _ _       ____
| __ )(_) |__ | (_) ___ / ___|  ___ __ _ _ __
|  _ \| | '_ \| | |/ _ \\___ \ / __/ _` | '_ \
| |_) | | |_) | | | (_) |___) | (_| (_| | | | |
|____/|_|_.__/|_|_|\___/|____/ \___\__,_|_| |_|
"#;
    println!("{}", banner);
    println!("         BiblioScan server started at: http://{}:{}\n", host, port);
}
