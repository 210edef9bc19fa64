//! Diagnostic-artifact sink for the browser-automation paths.
//!
//! Screenshots captured around a failed automation step go through this
//! collaborator rather than a hardcoded filesystem path; sink failures are
//! logged and swallowed so diagnostics never mask the primary error.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

#[async_trait]
pub trait DiagnosticSink: Send + Sync {
    /// Persist one artifact; returns a reference an operator can follow
    /// (a path, an object key), or `None` if the sink declined or failed.
    async fn capture(&self, label: &str, bytes: &[u8]) -> Option<String>;
}

/// Writes artifacts as `{label}-{uuid}.png` under one directory.
pub struct FsDiagnosticSink {
    dir: PathBuf,
}

impl FsDiagnosticSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DiagnosticSink for FsDiagnosticSink {
    async fn capture(&self, label: &str, bytes: &[u8]) -> Option<String> {
        let path = self.dir.join(format!("{label}-{}.png", Uuid::new_v4().simple()));
        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(target = "listbridge.diagnostics", error = %err, "artifact_dir_create_failed");
            return None;
        }
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Some(path.display().to_string()),
            Err(err) => {
                warn!(target = "listbridge.diagnostics", error = %err, "artifact_write_failed");
                None
            }
        }
    }
}

/// Discards every artifact. For embedders that do not collect diagnostics.
pub struct NullDiagnosticSink;

#[async_trait]
impl DiagnosticSink for NullDiagnosticSink {
    async fn capture(&self, _label: &str, _bytes: &[u8]) -> Option<String> {
        None
    }
}
