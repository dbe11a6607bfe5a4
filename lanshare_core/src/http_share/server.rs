//! HTTP file server
//!
//! Read-only catalog listing plus range-capable downloads and inline previews.

use anyhow::Result;
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::auth::{TokenGate, require_token};
use super::catalog::{CatalogItem, ShareCatalog, ShareEntry};
use super::range::parse_range;
use crate::transfer::policy::adaptive_buffer_size;

const TEXT_CSP: &str = "default-src 'none'";
const PAGE_CSP: &str = "default-src 'none'; style-src 'unsafe-inline'";

/// State handed to every handler
pub struct ServerContext {
    pub catalog: Arc<ShareCatalog>,
    /// Shown in the listing page title
    pub host_name: String,
}

impl ServerContext {
    pub fn new(catalog: Arc<ShareCatalog>) -> Self {
        let host_name = hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .unwrap_or_else(|| "Unknown-PC".to_string());
        Self { catalog, host_name }
    }
}

/// How a file body is presented to the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Attachment,
    Inline,
}

/// Middleware to add security headers
async fn add_security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers
        .entry(header::CONTENT_SECURITY_POLICY)
        .or_insert(HeaderValue::from_static(PAGE_CSP));

    response
}

async fn not_found_handler() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"))
}

async fn index_handler(State(ctx): State<Arc<ServerContext>>, headers: HeaderMap) -> Response {
    let entries = ctx.catalog.entries().await;
    if wants_json(&headers) {
        let items: Vec<CatalogItem> = entries.iter().map(ShareEntry::to_item).collect();
        return Json(items).into_response();
    }
    Html(render_listing(&ctx.host_name, &entries)).into_response()
}

async fn api_files_handler(State(ctx): State<Arc<ServerContext>>) -> Json<Vec<CatalogItem>> {
    Json(ctx.catalog.items().await)
}

async fn download_handler(
    State(ctx): State<Arc<ServerContext>>,
    Path(id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    serve_entry(&ctx, &id, &method, &headers, Disposition::Attachment).await
}

async fn preview_handler(
    State(ctx): State<Arc<ServerContext>>,
    Path(id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    serve_entry(&ctx, &id, &method, &headers, Disposition::Inline).await
}

/// Stream a catalog entry, honouring a single `Range` header.
///
/// HEAD gets the same headers as GET without opening a body stream.
async fn serve_entry(
    ctx: &ServerContext,
    id: &str,
    method: &Method,
    headers: &HeaderMap,
    disposition: Disposition,
) -> Response {
    let Some(entry) = ctx.catalog.get(id).await else {
        return (StatusCode::NOT_FOUND, "File not found").into_response();
    };

    let mut file = match tokio::fs::File::open(&entry.local_path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("Shared file {} unavailable: {}", entry.local_path.display(), e);
            return (StatusCode::NOT_FOUND, "File not found").into_response();
        }
    };
    let size = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(e) => {
            tracing::warn!("Cannot stat {}: {}", entry.local_path.display(), e);
            return (StatusCode::NOT_FOUND, "File not found").into_response();
        }
    };

    let requested = headers
        .get(header::RANGE)
        .map(|v| v.to_str().unwrap_or_default());
    let (status, start, length) = match requested {
        None => (StatusCode::OK, 0, size),
        Some(value) => match parse_range(value, size) {
            Ok(range) => (StatusCode::PARTIAL_CONTENT, range.start, range.len()),
            Err(e) => {
                tracing::debug!("Rejected range for {}: {}", entry.display_name, e);
                let mut response = (e.status(), e.to_string()).into_response();
                if e.status() == StatusCode::RANGE_NOT_SATISFIABLE {
                    insert_header(&mut response, header::CONTENT_RANGE, &format!("bytes */{}", size));
                }
                return response;
            }
        },
    };

    let mut response = if *method == Method::HEAD {
        Response::new(Body::empty())
    } else {
        if start > 0
            && let Err(e) = file.seek(SeekFrom::Start(start)).await
        {
            tracing::error!("Seek failed on {}: {}", entry.local_path.display(), e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        let stream = ReaderStream::with_capacity(file.take(length), adaptive_buffer_size(size));
        Response::new(Body::from_stream(stream))
    };
    *response.status_mut() = status;

    let content_type = match disposition {
        Disposition::Attachment => "application/octet-stream",
        Disposition::Inline => preview_content_type(&entry.extension),
    };
    insert_header(&mut response, header::CONTENT_TYPE, content_type);
    insert_header(&mut response, header::CONTENT_LENGTH, &length.to_string());
    insert_header(&mut response, header::ACCEPT_RANGES, "bytes");
    if status == StatusCode::PARTIAL_CONTENT {
        insert_header(
            &mut response,
            header::CONTENT_RANGE,
            &format!("bytes {}-{}/{}", start, start + length - 1, size),
        );
    }

    let file_name = header_safe_name(&entry.display_name);
    let disposition_value = match disposition {
        Disposition::Attachment => format!("attachment; filename=\"{}\"", file_name),
        Disposition::Inline => format!("inline; filename=\"{}\"", file_name),
    };
    insert_header(&mut response, header::CONTENT_DISPOSITION, &disposition_value);
    if content_type.starts_with("text/") {
        insert_header(&mut response, header::CONTENT_SECURITY_POLICY, TEXT_CSP);
    }

    if *method == Method::GET {
        tracing::info!(
            "Serving {} ({} of {} bytes, {})",
            entry.display_name,
            length,
            size,
            status
        );
    }
    response
}

fn insert_header(response: &mut Response, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
        response.headers_mut().insert(name, value);
    }
}

/// Preview MIME type; active content is served as plain text
pub fn preview_content_type(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "txt" | "py" | "js" | "html" | "css" => "text/plain; charset=utf-8",
        "json" => "application/json",
        "xml" => "text/xml",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

fn header_safe_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_listing(host_name: &str, entries: &[ShareEntry]) -> String {
    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<title>LAN File Share - {}</title>\n\
         <style>body {{ font-family: sans-serif; margin: 40px; }} .file-item {{ border: 1px solid #ddd; padding: 12px; margin: 8px 0; }} .file-info {{ color: #666; }}</style>\n\
         </head>\n<body>\n<h1>LAN File Share</h1>\n",
        escape_html(host_name)
    );

    if entries.is_empty() {
        html.push_str("<p class=\"no-files\">No files are currently being shared.</p>\n");
    }
    for entry in entries {
        let item = entry.to_item();
        html.push_str(&format!(
            "<div class=\"file-item\">\n<div class=\"file-name\">{name}</div>\n\
             <div class=\"file-info\">Size: {size} | Modified: {modified}</div>\n\
             <a href=\"/download/{id}\">Download</a> <a href=\"/files/{id}\" target=\"_blank\">Preview</a>\n</div>\n",
            name = escape_html(&item.name),
            size = item.size,
            modified = escape_html(&item.modified),
            id = item.id,
        ));
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// Build the share router. With a gate, every route requires a token.
pub fn create_router(ctx: Arc<ServerContext>, gate: Option<Arc<TokenGate>>) -> Router {
    let mut router = Router::new()
        .route("/", get(index_handler))
        .route("/api/files", get(api_files_handler))
        .route("/download/{id}", get(download_handler))
        .route("/files/{id}", get(preview_handler))
        .fallback(not_found_handler)
        .with_state(ctx);

    if let Some(gate) = gate {
        router = router.layer(middleware::from_fn_with_state(gate, require_token));
    }

    router
        .layer(middleware::from_fn(add_security_headers))
        .layer(TraceLayer::new_for_http())
}

/// Serve on an already-bound listener until `cancel_token` fires
pub async fn serve_on(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    gate: Option<Arc<TokenGate>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let router = create_router(ctx, gate);
    tracing::info!("File server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            tracing::info!("File server shutting down gracefully");
        })
        .await?;

    Ok(())
}

/// Bind `addr` and serve the catalog
pub async fn start_file_server(
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
    gate: Option<Arc<TokenGate>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, ctx, gate, cancel_token).await
}
