//! Tools backed by external executables. The plugin protocol is JSON on
//! stdin, text or JSON on stdout, so foreign code never shares the engine's
//! address space.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Result, ToolError};
use crate::tool::{Modality, Tool, ToolOutput, VersionInfo};

/// A discovered subprocess-backed tool.
pub struct SubprocessTool {
    name: String,
    description: String,
    usage: String,
    command: String,
    base_args: Vec<String>,
    modalities: Vec<Modality>,
    version_info: Option<VersionInfo>,
    trigger_keywords: Vec<String>,
}

impl SubprocessTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        description: String,
        usage: String,
        command: String,
        base_args: Vec<String>,
        modalities: Vec<Modality>,
        version_info: Option<VersionInfo>,
        trigger_keywords: Vec<String>,
    ) -> Self {
        Self {
            name,
            description,
            usage,
            command,
            base_args,
            modalities,
            version_info,
            trigger_keywords,
        }
    }
}

#[async_trait]
impl Tool for SubprocessTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn usage(&self) -> &str {
        &self.usage
    }

    fn modalities(&self) -> &[Modality] {
        &self.modalities
    }

    fn version_info(&self) -> Option<&VersionInfo> {
        self.version_info.as_ref()
    }

    fn trigger_keywords(&self) -> Vec<String> {
        self.trigger_keywords.clone()
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<ToolOutput> {
        let payload = serde_json::to_vec(&args)?;
        debug!(tool = %self.name, command = %self.command, "spawning subprocess tool");

        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.base_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::Execution(format!("spawn '{}' failed: {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| ToolError::Execution(format!("stdin write failed: {e}")))?;
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ToolError::Execution(format!("wait failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::Execution(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        // Structured output when the program prints JSON, text otherwise.
        match serde_json::from_str::<serde_json::Value>(&stdout) {
            Ok(value) => Ok(ToolOutput::Structured(value)),
            Err(_) => Ok(ToolOutput::Text(stdout)),
        }
    }
}
