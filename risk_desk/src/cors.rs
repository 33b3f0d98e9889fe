use std::sync::Arc;

use actix_cors::Cors;
use actix_web::http::{Method, header};
use fancy_regex::Regex;

/// Exact allowed origins plus one pattern for preview deployments.
pub struct OriginPolicy {
    allowed: Vec<String>,
    preview: Regex,
}

impl OriginPolicy {
    pub fn new(allowed: &[String], preview_pattern: &str) -> anyhow::Result<Self> {
        let preview = Regex::new(preview_pattern)?;
        Ok(Self {
            allowed: allowed.to_vec(),
            preview,
        })
    }

    pub fn allows(&self, origin: &str) -> bool {
        if self.allowed.iter().any(|allowed| allowed == origin) {
            return true;
        }
        match self.preview.is_match(origin) {
            Ok(matched) => matched,
            Err(e) => {
                log::warn!("Origin pattern failed on `{}`: {}", origin, e);
                false
            }
        }
    }
}

pub fn build_cors(policy: Arc<OriginPolicy>) -> Cors {
    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            origin
                .to_str()
                .map(|origin| policy.allows(origin))
                .unwrap_or(false)
        })
        .allowed_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT])
        .supports_credentials()
        .max_age(3600)
}
