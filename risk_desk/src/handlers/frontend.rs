use std::path::{Component, Path, PathBuf};

use actix_files::NamedFile;
use actix_web::{Error, HttpRequest, HttpResponse, error::InternalError, get, http::StatusCode, web};

use crate::state::AppState;

const ALLOWED_EXTENSIONS: [&str; 18] = [
    "html", "htm", "js", "mjs", "css", "map", "json", "png", "jpg", "jpeg", "gif", "svg", "ico",
    "webp", "txt", "woff", "woff2", "ttf",
];

#[derive(Debug, PartialEq, Eq)]
pub enum StaticRejection {
    NotFound,
    Forbidden,
}

fn has_allowed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Maps a request path onto a file inside `root`.
pub fn resolve_static_path(root: &Path, requested: &str) -> Result<PathBuf, StaticRejection> {
    let relative = Path::new(requested.trim_start_matches('/'));
    if requested.contains('\\')
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(StaticRejection::Forbidden);
    }
    if !has_allowed_extension(relative) {
        return Err(StaticRejection::NotFound);
    }

    let root = root.canonicalize().map_err(|_| StaticRejection::NotFound)?;
    let candidate = root
        .join(relative)
        .canonicalize()
        .map_err(|_| StaticRejection::NotFound)?;

    // Symlinks can still point outside the bundle.
    if !candidate.starts_with(&root) {
        return Err(StaticRejection::Forbidden);
    }
    if !candidate.is_file() {
        return Err(StaticRejection::NotFound);
    }
    Ok(candidate)
}

#[get("/")]
pub async fn index(req: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let index_html = app_state.frontend_dir.join("index.html");
    if index_html.is_file() {
        let file = NamedFile::open_async(&index_html).await?;
        return Ok(file.into_response(&req));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "message": "Transaction risk service is running",
    })))
}

#[get("/{filename:.*}")]
pub async fn static_file(
    req: HttpRequest,
    path: web::Path<String>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let requested = path.into_inner();

    let file_path = match resolve_static_path(&app_state.frontend_dir, &requested) {
        Ok(file_path) => file_path,
        Err(StaticRejection::Forbidden) => {
            log::warn!("Rejected static path outside frontend dir: {}", requested);
            return Err(InternalError::new("Forbidden.", StatusCode::FORBIDDEN).into());
        }
        Err(StaticRejection::NotFound) => {
            return Err(InternalError::new("Not found.", StatusCode::NOT_FOUND).into());
        }
    };

    let file = NamedFile::open_async(&file_path).await?;
    Ok(file.into_response(&req))
}
