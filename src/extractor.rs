//! Thin wrapper around the `yt-dlp` executable.
//!
//! Every call runs `yt-dlp --dump-single-json --skip-download` and parses the
//! JSON it prints. Nothing is cached: signed media URLs expire, so callers are
//! expected to re-run extraction whenever they need a fresh one.

use std::{
    collections::BTreeMap,
    io,
    path::PathBuf,
    process::{Command, Stdio},
};

use serde::Deserialize;
use thiserror::Error;
use tokio::task;

use crate::config::Settings;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    /// yt-dlp exited unsuccessfully; the payload is its stderr verbatim.
    #[error("{0}")]
    Failed(String),
    #[error("invalid extractor output: {0}")]
    InvalidOutput(#[from] serde_json::Error),
    #[error("extraction task failed: {0}")]
    Join(String),
}

/// Failures yt-dlp reports for content that exists but cannot be fetched
/// anonymously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    AgeRestricted,
    Private,
    LoginRequired,
}

impl AccessDenied {
    /// Order matters: the age gate message also contains "Sign in".
    pub fn classify(message: &str) -> Option<Self> {
        if message.contains("Sign in to confirm your age") {
            Some(Self::AgeRestricted)
        } else if message.contains("Private video") {
            Some(Self::Private)
        } else if message.contains("Sign in") {
            Some(Self::LoginRequired)
        } else {
            None
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::AgeRestricted => "This video is age-restricted and cannot be downloaded.",
            Self::Private => "This video is private.",
            Self::LoginRequired => "This video requires login.",
        }
    }
}

/// Subset of yt-dlp's info dict. Everything is optional because extractors
/// differ wildly in what they report.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub thumbnails: Option<Vec<RawThumbnail>>,
    pub duration: Option<f64>,
    pub formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawThumbnail {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub resolution: Option<String>,
    pub filesize: Option<u64>,
    pub url: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub protocol: Option<String>,
    /// Headers yt-dlp expects to accompany a fetch of `url`.
    pub http_headers: Option<BTreeMap<String, String>>,
}

impl RawInfo {
    pub fn formats(&self) -> &[RawFormat] {
        self.formats.as_deref().unwrap_or_default()
    }

    /// Top-level thumbnail, else the last (usually largest) listed one.
    pub fn thumbnail_url(&self) -> Option<&str> {
        self.thumbnail
            .as_deref()
            .filter(|url| !url.is_empty())
            .or_else(|| {
                self.thumbnails
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .rev()
                    .find_map(|thumb| thumb.url.as_deref().filter(|url| !url.is_empty()))
            })
    }

    pub fn find_format(&self, format_id: &str) -> Option<&RawFormat> {
        self.formats()
            .iter()
            .find(|format| format.format_id.as_deref() == Some(format_id))
    }
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    user_agent: String,
    player_clients: Vec<String>,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>, user_agent: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            user_agent: user_agent.into(),
            player_clients: Vec::new(),
        }
    }

    pub fn with_player_clients(mut self, clients: Vec<String>) -> Self {
        self.player_clients = clients;
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.ytdlp_path, &settings.user_agent)
            .with_player_clients(settings.player_clients.clone())
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Arguments for a metadata-only run. The URL always follows `--` so a
    /// value starting with a dash is never read as an option.
    pub fn command_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--skip-download".to_string(),
            "--no-progress".to_string(),
            "--quiet".to_string(),
            "--no-warnings".to_string(),
            "--no-flat-playlist".to_string(),
        ];
        if !self.player_clients.is_empty() {
            args.push("--extractor-args".to_string());
            args.push(format!(
                "youtube:player_client={}",
                self.player_clients.join(",")
            ));
        }
        if !self.user_agent.is_empty() {
            args.push("--user-agent".to_string());
            args.push(self.user_agent.clone());
        }
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    /// Blocking extraction. Prefer [`YtDlp::resolve`] from async code.
    pub fn extract(&self, url: &str) -> Result<RawInfo, ExtractError> {
        let output = Command::new(&self.program)
            .args(self.command_args(url))
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExtractError::Spawn {
                program: self.program_name(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with status {}", self.program_name(), output.status)
            } else {
                stderr
            };
            return Err(ExtractError::Failed(message));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    pub async fn resolve(&self, url: &str) -> Result<RawInfo, ExtractError> {
        let extractor = self.clone();
        let url = url.to_owned();
        task::spawn_blocking(move || extractor.extract(&url))
            .await
            .map_err(|err| ExtractError::Join(err.to_string()))?
    }

    /// Runs `<program> --version`; used by the health endpoint and at startup
    /// to fail loudly when yt-dlp is missing.
    pub async fn version(&self) -> Result<String, ExtractError> {
        let extractor = self.clone();
        task::spawn_blocking(move || {
            let output = Command::new(&extractor.program)
                .arg("--version")
                .stdin(Stdio::null())
                .output()
                .map_err(|source| ExtractError::Spawn {
                    program: extractor.program_name(),
                    source,
                })?;
            if !output.status.success() {
                return Err(ExtractError::Failed(format!(
                    "{} --version exited with status {}",
                    extractor.program_name(),
                    output.status
                )));
            }
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        })
        .await
        .map_err(|err| ExtractError::Join(err.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{install_ytdlp_stub, stub_failing, stub_printing};
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn classify_prefers_age_gate_over_login() {
        assert_eq!(
            AccessDenied::classify("ERROR: [youtube] x: Sign in to confirm your age"),
            Some(AccessDenied::AgeRestricted)
        );
        assert_eq!(
            AccessDenied::classify("ERROR: [youtube] x: Private video. Sign in if you've been granted access"),
            Some(AccessDenied::Private)
        );
        assert_eq!(
            AccessDenied::classify("ERROR: Sign in to view this content"),
            Some(AccessDenied::LoginRequired)
        );
        assert_eq!(AccessDenied::classify("ERROR: Unsupported URL"), None);
    }

    #[test]
    fn command_args_carry_knobs_and_guard_url() {
        let ytdlp = YtDlp::new("yt-dlp", "Agent/1.0")
            .with_player_clients(vec!["ios".into(), "web".into()]);
        let args = ytdlp.command_args("-https://evil");
        assert!(args.contains(&"--no-warnings".to_string()));
        assert!(args.contains(&"--no-flat-playlist".to_string()));
        assert!(args.contains(&"youtube:player_client=ios,web".to_string()));
        let ua = args.iter().position(|arg| arg == "--user-agent").unwrap();
        assert_eq!(args[ua + 1], "Agent/1.0");
        assert_eq!(&args[args.len() - 2..], ["--", "-https://evil"]);
    }

    #[test]
    fn command_args_skip_empty_client_list() {
        let args = YtDlp::new("yt-dlp", "UA").command_args("https://a");
        assert!(!args.contains(&"--extractor-args".to_string()));
    }

    #[test]
    fn raw_info_tolerates_sparse_payloads() -> Result<()> {
        let info: RawInfo = serde_json::from_str(
            r#"{"id":"x","duration":12,"thumbnails":[{"url":"https://a/1.jpg"},{"id":"n"},{"url":"https://a/2.jpg"}],"formats":[{"format_id":"18","filesize":null,"extra":1}]}"#,
        )?;
        assert_eq!(info.duration, Some(12.0));
        assert_eq!(info.thumbnail_url(), Some("https://a/2.jpg"));
        assert!(info.find_format("18").is_some());
        assert!(info.find_format("22").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn resolve_parses_stub_output() -> Result<()> {
        let dir = tempdir()?;
        let program = install_ytdlp_stub(
            dir.path(),
            &stub_printing(r#"{"id":"abc","title":"Stub","formats":[]}"#),
        )?;
        let info = YtDlp::new(program, "UA").resolve("https://example.com/v").await?;
        assert_eq!(info.id.as_deref(), Some("abc"));
        assert_eq!(info.title.as_deref(), Some("Stub"));
        Ok(())
    }

    #[tokio::test]
    async fn resolve_surfaces_stderr_on_failure() -> Result<()> {
        let dir = tempdir()?;
        let program = install_ytdlp_stub(dir.path(), &stub_failing("ERROR: Private video"))?;
        let err = YtDlp::new(program, "UA")
            .resolve("https://example.com/v")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Failed(ref msg) if msg == "ERROR: Private video"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempdir().unwrap();
        let err = YtDlp::new(dir.path().join("nope"), "UA")
            .resolve("https://example.com/v")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Spawn { .. }));
    }
}
