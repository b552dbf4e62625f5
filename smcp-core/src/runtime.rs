//! Python subprocess runtime for the framework adapters.
//!
//! Each call spawns one interpreter, writes a JSON request to its stdin and
//! reads a JSON response from stdout. The child is killed if the calling
//! future is dropped, so an evaluation timeout never leaks processes.

use crate::config::PythonConfig;
use crate::error::{FrameworkError, SmcpError};
use crate::types::Framework;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Managed Python subprocess runner.
#[derive(Debug, Clone)]
pub struct PythonRuntime {
    python_path: PathBuf,
    venv_path: Option<PathBuf>,
}

impl PythonRuntime {
    pub fn new(config: &PythonConfig) -> Self {
        Self {
            python_path: config.python_path.clone(),
            venv_path: config.venv_path.clone(),
        }
    }

    /// Effective interpreter, accounting for a configured venv.
    pub fn python_cmd(&self) -> PathBuf {
        if let Some(venv) = &self.venv_path {
            let bin_dir = if cfg!(windows) { "Scripts" } else { "bin" };
            venv.join(bin_dir).join("python")
        } else {
            self.python_path.clone()
        }
    }

    /// Run an inline script with a JSON request on stdin.
    ///
    /// Spawn failures and missing imports are reported as an unavailable
    /// runtime; any other non-zero exit is an inference failure carrying the
    /// raw stderr, which callers sanitize.
    pub async fn run_script(
        &self,
        framework: Framework,
        script: &str,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, SmcpError> {
        let payload = serde_json::to_vec(input)
            .map_err(|e| SmcpError::internal(format!("Failed to encode request: {e}")))?;

        debug!(
            framework = %framework,
            script_len = script.len(),
            request_bytes = payload.len(),
            "Running Python script"
        );

        let mut child = Command::new(self.python_cmd())
            .args(["-c", script])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FrameworkError::unavailable(framework, format!("Failed to spawn Python: {e}"))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits early reports through its stderr below.
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(error = %e, "Python process closed stdin early");
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            FrameworkError::inference(framework, format!("Python process failed: {e}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let err = if is_missing_dependency(&stderr) {
                FrameworkError::unavailable(framework, stderr)
            } else {
                FrameworkError::inference(framework, stderr)
            };
            return Err(SmcpError::from(err));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let value = serde_json::from_str(stdout.trim()).map_err(|e| {
            FrameworkError::inference(framework, format!("Invalid JSON output: {e}"))
        })?;
        Ok(value)
    }
}

fn is_missing_dependency(stderr: &str) -> bool {
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|l| l.starts_with("ModuleNotFoundError") || l.starts_with("ImportError"))
}
