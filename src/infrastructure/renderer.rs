use crate::domain::error::{AppError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command as TokioCommand;
use tracing::{info, warn};

/// Scratch directory removed on drop, whichever way the conversion ends.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create() -> Result<Self> {
        let path = std::env::temp_dir().join(format!("liftforms-render-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path)
            .map_err(|e| AppError::IoError(format!("Failed to create {}: {}", path.display(), e)))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(dir = %self.path.display(), error = %e, "Failed to remove render scratch dir");
        }
    }
}

/// Converts workbooks to PDF with a headless office suite.
#[derive(Debug, Clone)]
pub struct PdfRenderer {
    binary: String,
}

impl PdfRenderer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub async fn workbook_to_pdf(&self, workbook: &[u8]) -> Result<Vec<u8>> {
        let scratch = ScratchDir::create()?;
        let input = scratch.path().join("protocol.xlsx");
        tokio::fs::write(&input, workbook).await?;

        let mut cmd = TokioCommand::new(&self.binary);
        cmd.arg("--headless")
            .arg("--norestore")
            .arg(format!(
                "-env:UserInstallation=file://{}",
                scratch.path().join("profile").display()
            ))
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(scratch.path())
            .arg(&input)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            AppError::RenderError(format!("Failed to spawn {}: {}", self.binary, e))
        })?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AppError::RenderError(format!("Renderer did not finish: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::RenderError(format!(
                "Renderer exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let pdf_path = scratch.path().join("protocol.pdf");
        let pdf = tokio::fs::read(&pdf_path).await.map_err(|e| {
            AppError::RenderError(format!("Renderer produced no PDF: {}", e))
        })?;
        info!(size = pdf.len(), "Workbook rendered to PDF");
        Ok(pdf)
    }
}
