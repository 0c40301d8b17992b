use actix_web::{web, HttpResponse};
use tera::{Context, Tera};

use crate::config::Config;
use crate::error::{AppError, AppResult};

const INDEX_TEMPLATE: &str = include_str!("../../templates/index.html");

/// Template set with the embedded index page registered.
pub fn templates() -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_template("index.html", INDEX_TEMPLATE)?;
    Ok(tera)
}

pub async fn index(tmpl: web::Data<Tera>, config: web::Data<Config>) -> AppResult<HttpResponse> {
    let mut context = Context::new();
    // f32 Display, serde would print the widened f64
    context.insert("default_conf", &config.default_conf.to_string());
    context.insert("default_iou", &config.default_iou.to_string());
    context.insert("llm_enabled", &config.agent.llm_api_key.is_some());

    let rendered = tmpl.render("index.html", &context).map_err(|e| {
        log::error!("Template error: {}", e);
        AppError::Internal(format!("Template error: {}", e))
    })?;

    Ok(HttpResponse::Ok().content_type("text/html").body(rendered))
}
