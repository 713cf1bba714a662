//! Fixtures shared by the unit tests: a scripted stand-in for yt-dlp and a
//! local upstream HTTP server.

use std::{
    fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::stream;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Bytes `/broken` delivers before the connection breaks off.
pub(crate) const BROKEN_PREFIX_LEN: usize = 20_000;

pub(crate) fn install_ytdlp_stub(dir: &Path, body: &str) -> Result<PathBuf> {
    let script_path = dir.join("yt-dlp");
    let script = format!(
        "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then\n    echo 2025.01.01-stub\n    exit 0\nfi\n{body}"
    );
    fs::write(&script_path, script)?;
    #[cfg(unix)]
    {
        let mut perms = fs::metadata(&script_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms)?;
    }
    Ok(script_path)
}

pub(crate) fn stub_printing(json: &str) -> String {
    format!("cat <<'JSON'\n{json}\nJSON\nexit 0\n")
}

pub(crate) fn stub_failing(message: &str) -> String {
    format!("cat >&2 <<'MSG'\n{message}\nMSG\nexit 1\n")
}

pub(crate) fn media_payload() -> Vec<u8> {
    (0..50_000u32).map(|i| (i % 251) as u8).collect()
}

async fn media() -> Vec<u8> {
    media_payload()
}

async fn raw_image() -> Response {
    Response::new(Body::from(b"\x89raw-image".as_slice()))
}

async fn png_image() -> Response {
    ([(header::CONTENT_TYPE, "image/png")], b"\x89PNG".as_slice()).into_response()
}

async fn echo_user_agent(headers: HeaderMap) -> Response {
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Response::new(Body::from(agent))
}

/// Chunked body that errors after [`BROKEN_PREFIX_LEN`] bytes, so the
/// connection closes without the terminating chunk.
async fn broken() -> Response {
    let chunks = stream::unfold(0u8, |step| async move {
        match step {
            0 => Some((Ok(Bytes::from(vec![7u8; BROKEN_PREFIX_LEN])), 1)),
            1 => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Some((Err(io::Error::other("upstream went away")), 2))
            }
            _ => None,
        }
    });
    Response::new(Body::from_stream(chunks))
}

/// Never finishes on its own.
async fn endless() -> Response {
    let chunks = stream::unfold((), |()| async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Some((Ok::<_, io::Error>(Bytes::from_static(&[1u8; 4096])), ()))
    });
    Response::new(Body::from_stream(chunks))
}

/// Serves a handful of fixed resources on an ephemeral localhost port.
pub(crate) async fn spawn_upstream() -> Result<SocketAddr> {
    let app = Router::new()
        .route("/media", get(media))
        .route("/image/raw", get(raw_image))
        .route("/image/png", get(png_image))
        .route("/echo-ua", get(echo_user_agent))
        .route("/broken", get(broken))
        .route("/endless", get(endless))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route("/forbidden", get(|| async { StatusCode::FORBIDDEN }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}
