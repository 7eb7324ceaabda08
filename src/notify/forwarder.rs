//! proxmox-mail-forward transport.
//!
//! The forwarder reads a complete message on stdin and routes it through the
//! host's notification system, so no recipient is needed here.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::process::{ProcessRunner, run_cancellable};
use crate::error::NotifyError;

/// Backend name reported in results.
pub const BACKEND_NAME: &str = "proxmox-mail-forward";

pub struct Forwarder {
    candidates: Vec<PathBuf>,
    runner: Arc<dyn ProcessRunner>,
}

impl Forwarder {
    pub fn new(candidates: Vec<PathBuf>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { candidates, runner }
    }

    /// First candidate that exists as a file.
    pub fn locate(&self) -> Option<PathBuf> {
        self.candidates.iter().find(|p| p.is_file()).cloned()
    }

    /// Stream `message` to the forwarder.
    ///
    /// Returns the path of the binary used.
    pub async fn send(
        &self,
        message: &[u8],
        cancel: &CancellationToken,
    ) -> Result<PathBuf, NotifyError> {
        let binary = self.locate().ok_or_else(|| {
            let searched = self
                .candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            NotifyError::Transport(format!("{} not found (searched: {})", BACKEND_NAME, searched))
        })?;

        let program = binary.to_string_lossy().into_owned();
        tracing::debug!(binary = %program, bytes = message.len(), "Piping message to forwarder");
        let output = run_cancellable(&*self.runner, &program, &[], Some(message), cancel).await?;
        if !output.success() {
            let stderr = output.stderr.trim();
            return Err(NotifyError::Transport(format!(
                "{} exited with status {}: {}",
                BACKEND_NAME,
                output.status_display(),
                if stderr.is_empty() { "no output" } else { stderr }
            )));
        }

        tracing::info!(binary = %program, "Message handed off to proxmox-mail-forward");
        Ok(binary)
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}
