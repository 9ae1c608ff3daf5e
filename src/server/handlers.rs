//! Endpoint handlers for the snapshot test protocol.
//!
//! Handler-local failures are converted into `{result: "ERROR"}` responses;
//! a malformed upload must never take the server down mid-run.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::{Method, Uri};
use axum::response::{Html, IntoResponse, Response};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::compare::{self, ComparisonResult};
use crate::report::TestCase;
use crate::server::ServerContext;
use crate::server::types::{ApiResponse, LogRequest, ReportTestRequest};

/// Debug aid returned for any request outside the protocol: lets a human
/// poke the upload endpoint from a browser.
const UPLOAD_FORM: &str = concat!(
    "<form action=\"base64\" method=\"post\" enctype=\"multipart/form-data\">",
    "<input type=\"file\" name=\"filetoupload\"><br>",
    "<input type=\"hidden\" name=\"base64\" value=\"some base 64 string\" />",
    "<input type=\"hidden\" name=\"fileName\" value=\"file.png\" />",
    "<input type=\"submit\">",
    "</form>",
);

/// `POST /initTests`: idempotently recreate the run directories. Reference
/// images are fixtures and survive; uploads and diffs from a previous run
/// are cleared so they cannot be mistaken for current-run artifacts.
pub(super) async fn init_tests(State(ctx): State<Arc<ServerContext>>) -> Json<ApiResponse> {
    info!(path = %ctx.snapshots_path.display(), "initializing tests");

    let (refs, uploads, diffs) = (ctx.ref_images_dir(), ctx.uploads_dir(), ctx.diffs_dir());
    let result = tokio::task::spawn_blocking(move || {
        mk_dir(&refs, false)?;
        mk_dir(&uploads, true)?;
        mk_dir(&diffs, true)
    })
    .await;

    match result {
        Ok(Ok(())) => Json(ApiResponse::ok()),
        Ok(Err(err)) => Json(ApiResponse::error(format!(
            "failed to prepare snapshot directories: {}",
            err
        ))),
        Err(err) => Json(ApiResponse::error(err.to_string())),
    }
}

/// `POST /registerTest`: record a skipped placeholder so the test is
/// reported even if the run never reaches it.
pub(super) async fn register_test(
    State(ctx): State<Arc<ServerContext>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Json<ApiResponse> {
    let fields = match read_form_fields(multipart).await {
        Ok(fields) => fields,
        Err(info) => return Json(ApiResponse::error(info)),
    };
    let Some(name) = fields.get("name").filter(|n| !n.is_empty()) else {
        return Json(ApiResponse::error("field [name] is required"));
    };

    debug!(name, "registering test");
    ctx.reporter.lock().register_test(name);
    Json(ApiResponse::ok())
}

/// `POST /base64`: store the uploaded snapshot and compare it against the
/// reference image, writing a diff image on mismatch.
pub(super) async fn upload_base64(
    State(ctx): State<Arc<ServerContext>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Json<ApiResponse> {
    let fields = match read_form_fields(multipart).await {
        Ok(fields) => fields,
        Err(info) => return Json(ApiResponse::error(info)),
    };
    let Some(file_name) = fields.get("fileName") else {
        return Json(ApiResponse::error("field [fileName] is required"));
    };
    let Some(payload) = fields.get("base64") else {
        return Json(ApiResponse::error("field [base64] is required"));
    };
    if let Err(info) = validate_file_name(file_name) {
        return Json(ApiResponse::error(info));
    }

    info!(file_name, "processing base64 snapshot upload");

    // Clients are free to wrap the payload; the decoder is not.
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = match base64::Engine::decode(&base64::engine::general_purpose::STANDARD, cleaned) {
        Ok(bytes) => bytes,
        Err(err) => return Json(ApiResponse::error(format!("invalid base64 payload: {}", err))),
    };

    let upload_file = ctx.uploads_dir().join(file_name);
    let reference_file = ctx.ref_images_dir().join(file_name);
    let diff_file = ctx.diffs_dir().join(file_name);

    if let Err(err) = tokio::fs::write(&upload_file, &bytes).await {
        return Json(ApiResponse::error(format!(
            "failed to write [{}]: {}",
            upload_file.display(),
            err
        )));
    }
    debug!(file = %upload_file.display(), bytes = bytes.len(), "snapshot written");

    // Image decode and the pixel walk are CPU/file bound; keep them off the
    // accept loop.
    let outcome = tokio::task::spawn_blocking(move || {
        compare::compare(&upload_file, &reference_file, Some(&diff_file))
    })
    .await;

    let response = match outcome {
        Ok(Ok(ComparisonResult::Match)) => ApiResponse::ok(),
        Ok(Ok(ComparisonResult::Mismatch(count))) => {
            ApiResponse::error(format!("Files mismatch with {} pixels", count))
        }
        Ok(Ok(ComparisonResult::LayoutMismatch)) => {
            ApiResponse::error("Layout mismatch: images have different dimensions".to_string())
        }
        Ok(Err(err)) => ApiResponse::error(format!("Failed to compare images: {}", err)),
        Err(err) => ApiResponse::error(err.to_string()),
    };
    Json(response)
}

/// `POST /reportTest`: upsert the finished case by name
pub(super) async fn report_test(
    State(ctx): State<Arc<ServerContext>>,
    payload: Result<Json<ReportTestRequest>, JsonRejection>,
) -> Json<ApiResponse> {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => return Json(ApiResponse::error(rejection.body_text())),
    };

    debug!(name = request.name, "test reported");
    ctx.reporter.lock().report_test(TestCase::from(request));
    Json(ApiResponse::ok())
}

/// `POST /log`: forward a client log record to the host logger
pub(super) async fn client_log(
    payload: Result<Json<LogRequest>, JsonRejection>,
) -> Json<ApiResponse> {
    let Json(record) = match payload {
        Ok(json) => json,
        Err(rejection) => return Json(ApiResponse::error(rejection.body_text())),
    };

    let message = record
        .args
        .iter()
        .map(|arg| match arg {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ");

    match record.log_level.as_deref() {
        Some("e") => tracing::error!(tag = record.tag, "{}", message),
        Some("w") => tracing::warn!(tag = record.tag, "{}", message),
        Some("i") => tracing::info!(tag = record.tag, "{}", message),
        Some("d") => tracing::debug!(tag = record.tag, "{}", message),
        _ => tracing::trace!(tag = record.tag, "{}", message),
    }
    Json(ApiResponse::ok())
}

/// `POST /endOfTests`: acknowledge immediately, then fire the completion
/// signal after a short delay so in-flight `/log` calls land first.
pub(super) async fn end_of_tests(State(ctx): State<Arc<ServerContext>>) -> Json<ApiResponse> {
    info!("end of tests received");
    let completion = ctx.signals.completion.clone();
    let delay = ctx.end_of_tests_delay;
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if completion.send(()).await.is_err() {
            debug!("completion signal has no listener");
        }
    });
    Json(ApiResponse::ok())
}

/// Anything outside the protocol: unknown POSTs get a JSON error, every
/// other method gets the debug upload form.
pub(super) async fn fallback(method: Method, uri: Uri) -> Response {
    if method == Method::POST {
        warn!(%uri, "no handler for path");
        Json(ApiResponse::error("Invalid url")).into_response()
    } else {
        Html(UPLOAD_FORM).into_response()
    }
}

/// Collect all text fields of a multipart form into a map
async fn read_form_fields(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<HashMap<String, String>, String> {
    let mut multipart = multipart.map_err(|rejection| rejection.body_text())?;
    let mut fields = HashMap::new();

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let Some(name) = field.name().map(String::from) else {
                    continue;
                };
                let value = field.text().await.map_err(|err| err.to_string())?;
                fields.insert(name, value);
            }
            Ok(None) => break,
            Err(err) => return Err(err.to_string()),
        }
    }

    Ok(fields)
}

/// Reject names that would escape the snapshot directories
fn validate_file_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("field [fileName] must not be empty".to_string());
    }
    let path = Path::new(name);
    if path.components().count() != 1 || name.contains("..") || name.contains(['/', '\\']) {
        return Err(format!("invalid fileName [{}]", name));
    }
    Ok(())
}

/// Create `dir`, first removing it when `clean` is set
fn mk_dir(dir: &PathBuf, clean: bool) -> std::io::Result<()> {
    if clean && dir.exists() {
        info!(dir = %dir.display(), "cleaning");
        fs::remove_dir_all(dir)?;
    }
    if !dir.exists() {
        info!(dir = %dir.display(), "creating");
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_validation_rejects_traversal() {
        assert!(validate_file_name("home.png").is_ok());
        assert!(validate_file_name("home_screen_2.png").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("../escape.png").is_err());
        assert!(validate_file_name("a/b.png").is_err());
        assert!(validate_file_name("a\\b.png").is_err());
    }

    #[test]
    fn mk_dir_clean_removes_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("uploads");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.png"), b"old").unwrap();

        mk_dir(&target, true).unwrap();

        assert!(target.exists());
        assert!(!target.join("stale.png").exists());
    }

    #[test]
    fn mk_dir_without_clean_preserves_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("refImages");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("baseline.png"), b"ref").unwrap();

        mk_dir(&target, false).unwrap();

        assert!(target.join("baseline.png").exists());
    }
}
