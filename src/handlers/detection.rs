use actix_web::{web, HttpResponse};
use log::info;

use crate::config::Config;
use crate::error::AppResult;
use crate::handlers::{acquire_workspace, WorkspaceLock};
use crate::models::{DetectionParams, ThresholdParams};
use crate::services::{AgentService, Pipeline};

/// Query thresholds with the configured defaults filled in.
pub fn detection_params(query: &ThresholdParams, config: &Config) -> DetectionParams {
    DetectionParams {
        conf: query.conf.unwrap_or(config.default_conf),
        iou: query.iou.unwrap_or(config.default_iou),
    }
}

pub async fn detect(
    query: web::Query<ThresholdParams>,
    pipeline: web::Data<Pipeline>,
    config: web::Data<Config>,
    lock: web::Data<WorkspaceLock>,
) -> AppResult<HttpResponse> {
    let params = detection_params(&query, &config);
    let guard = acquire_workspace(lock).await;

    let pipeline = pipeline.into_inner();
    let response = web::block(move || {
        let _guard = guard;
        pipeline.detect(params)
    })
    .await??;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn detect_and_ocr(
    query: web::Query<ThresholdParams>,
    pipeline: web::Data<Pipeline>,
    config: web::Data<Config>,
    lock: web::Data<WorkspaceLock>,
) -> AppResult<HttpResponse> {
    let params = detection_params(&query, &config);
    let guard = acquire_workspace(lock).await;

    let pipeline = pipeline.into_inner();
    let response = web::block(move || {
        let _guard = guard;
        pipeline.detect_and_ocr(params)
    })
    .await??;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn detect_and_ocr_and_agent(
    query: web::Query<ThresholdParams>,
    pipeline: web::Data<Pipeline>,
    agent: web::Data<AgentService>,
    config: web::Data<Config>,
    lock: web::Data<WorkspaceLock>,
) -> AppResult<HttpResponse> {
    let params = detection_params(&query, &config);

    let guard = acquire_workspace(lock).await;
    let pipeline = pipeline.into_inner();
    let ocr = web::block(move || {
        let _guard = guard;
        pipeline.detect_and_ocr(params)
    })
    .await??;

    info!("Resolving {} books", ocr.num_books);
    let response = agent.resolve_all(ocr).await;
    Ok(HttpResponse::Ok().json(response))
}
