use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use domour_platform::HideWindow;
use log::{debug, error, trace};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const CHAT_TIMEOUT: Duration = Duration::from_secs(90);
const CHAT_PROXY: &str = "http://127.0.0.1:8118";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("gemini cli not found in PATH")]
    NotInstalled(#[source] which::Error),
    #[error("gemini cli timeout")]
    Timeout,
    #[error("failed to run {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("gemini cli error: {0}")]
    Failed(String),
    #[error("gemini cli returned empty response")]
    EmptyResponse,
    #[error("failed to read attachment {}: {source}", path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub is_binary: bool,
}

impl Attachment {
    /// Text files are attached as-is, anything else as base64.
    pub fn from_file(path: &Path) -> Result<Self, ChatError> {
        let bytes = std::fs::read(path).map_err(|source| ChatError::Attachment {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());

        Ok(match String::from_utf8(bytes) {
            Ok(content) => Self {
                name,
                content,
                is_binary: false,
            },
            Err(error) => Self {
                name,
                content: STANDARD.encode(error.into_bytes()),
                is_binary: true,
            },
        })
    }
}

/// Prompt followed by an `Attachments:` section. Attachments with a blank
/// name or blank content are left out.
#[must_use]
pub fn compose_prompt(prompt: &str, attachments: &[Attachment]) -> String {
    let mut combined = prompt.trim().to_string();
    if attachments.is_empty() {
        return combined;
    }

    combined.push_str("\n\nAttachments:\n");
    for attachment in attachments {
        let name = attachment.name.trim();
        let content = attachment.content.trim();
        if name.is_empty() || content.is_empty() {
            continue;
        }
        if attachment.is_binary {
            combined.push_str(&format!("- {name} (base64)\n{content}\n"));
        } else {
            combined.push_str(&format!("- {name}\n```\n{content}\n```\n"));
        }
    }
    combined
}

/// Pipes prompts to the Gemini CLI through the local HTTP proxy.
#[derive(Debug, Clone)]
pub struct ChatRelay {
    program: PathBuf,
    args: Vec<OsString>,
    proxy: String,
    timeout: Duration,
}

impl ChatRelay {
    /// Relay through the `gemini` binary on `PATH`.
    pub fn gemini() -> Result<Self, ChatError> {
        let program = which::which("gemini").map_err(ChatError::NotInstalled)?;
        debug!("Using gemini cli at {}", program.display());
        Ok(Self::with_command(program, ["chat", "--yolo"]))
    }

    #[must_use]
    pub fn with_command<I, S>(program: PathBuf, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            proxy: CHAT_PROXY.to_string(),
            timeout: CHAT_TIMEOUT,
        }
    }

    /// Send the prompt and attachments, returning the trimmed reply. A blank
    /// prompt returns an empty reply without running anything.
    pub async fn send(&self, prompt: &str, attachments: &[Attachment]) -> Result<String, ChatError> {
        if prompt.trim().is_empty() {
            return Ok(String::new());
        }
        let input = compose_prompt(prompt, attachments);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("HTTP_PROXY", &self.proxy)
            .env("HTTPS_PROXY", &self.proxy)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .hide_window()
            .spawn()
            .map_err(|source| ChatError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let write_prompt = async move {
            if let Some(mut stdin) = stdin
                && let Err(error) = stdin.write_all(input.as_bytes()).await
            {
                debug!("Chat command closed stdin early: {error}");
            }
        };
        let exchange = async move {
            let ((), output) = tokio::join!(write_prompt, child.wait_with_output());
            output
        };

        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ChatError::Timeout)?
            .map_err(|source| ChatError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.stderr.is_empty() {
            trace!("Chat stderr: {}", String::from_utf8_lossy(&output.stderr));
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            error!("Chat command failed: {message}");
            return Err(ChatError::Failed(message));
        }

        let reply = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if reply.is_empty() {
            return Err(ChatError::EmptyResponse);
        }
        Ok(reply)
    }
}
