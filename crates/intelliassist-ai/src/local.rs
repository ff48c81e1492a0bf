//! Local command-line models used as the last link of a chain.
//!
//! The transcriber follows whisper.cpp's CLI (`-m model -f file --output-txt`,
//! transcript written next to the input as `<file>.txt`); the captioner prints
//! its caption on stdout. Availability is probed once per adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::provider::{AudioInput, Caption, ImageInput, Outcome, Provider, Transcription};
use crate::{ProviderError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCommandConfig {
    pub executable: String,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl LocalCommandConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            model_path: None,
            args: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct LocalCommand {
    config: LocalCommandConfig,
    available: OnceCell<bool>,
}

impl LocalCommand {
    fn new(config: LocalCommandConfig) -> Self {
        Self {
            config,
            available: OnceCell::new(),
        }
    }

    /// Spawns `<executable> --help` the first time it is asked.
    async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let status = Command::new(&self.config.executable)
                    .arg("--help")
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
                let available = status.is_ok();
                info!(executable = %self.config.executable, available, "Checked local model");
                available
            })
            .await
    }

    async fn ensure_available(&self) -> Result<()> {
        if self.is_available().await {
            Ok(())
        } else {
            Err(ProviderError::Unavailable(format!(
                "local command '{}' not found",
                self.config.executable
            )))
        }
    }

    async fn write_temp(bytes: &[u8], extension: &str) -> Result<NamedTempFile> {
        let file = tempfile::Builder::new()
            .prefix("intelliassist-")
            .suffix(&format!(".{}", extension))
            .tempfile()?;
        tokio::fs::write(file.path(), bytes).await?;
        Ok(file)
    }

    async fn run(&self, command: &mut Command) -> Result<String> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(command = ?command, "Running local model");

        let output = command.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(executable = %self.config.executable, "Local model failed: {}", stderr.trim());
            return Err(ProviderError::Api {
                status: output.status.code().unwrap_or(-1).clamp(0, u16::MAX as i32) as u16,
                message: format!("{} exited with {}: {}", self.config.executable, output.status, stderr.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn transcript_path(audio_path: &Path) -> String {
    format!("{}.txt", audio_path.display())
}

pub struct LocalTranscriber {
    name: String,
    command: LocalCommand,
}

impl LocalTranscriber {
    pub fn new(config: LocalCommandConfig) -> Self {
        Self {
            name: "local-whisper".to_string(),
            command: LocalCommand::new(config),
        }
    }

    pub async fn is_available(&self) -> bool {
        self.command.is_available().await
    }

    async fn transcribe(&self, audio: &AudioInput) -> Result<Transcription> {
        if audio.bytes.is_empty() {
            return Err(ProviderError::InvalidInput("audio is empty".to_string()));
        }
        self.command.ensure_available().await?;

        let file = LocalCommand::write_temp(&audio.bytes, &audio.extension()).await?;
        let config = &self.command.config;
        let mut command = Command::new(&config.executable);
        if let Some(model) = &config.model_path {
            command.arg("-m").arg(model);
        }
        command
            .arg("-f")
            .arg(file.path())
            .arg("--output-txt")
            .arg("--no-timestamps")
            .args(&config.args);
        self.command.run(&mut command).await?;

        let txt_path = transcript_path(file.path());
        let text = tokio::fs::read_to_string(&txt_path).await?;
        let _ = tokio::fs::remove_file(&txt_path).await;

        Ok(Transcription {
            text: text.trim().to_string(),
            confidence: 0.8,
            language: None,
        })
    }
}

#[async_trait]
impl Provider for LocalTranscriber {
    type Input = AudioInput;
    type Output = Transcription;

    fn name(&self) -> &str {
        &self.name
    }

    fn operation(&self) -> &str {
        "transcribe"
    }

    #[instrument(skip(self, input), fields(file = %input.filename))]
    async fn invoke(&self, input: &AudioInput) -> Outcome<Transcription> {
        self.transcribe(input).await.into()
    }
}

pub struct LocalCaptioner {
    name: String,
    command: LocalCommand,
}

impl LocalCaptioner {
    pub fn new(config: LocalCommandConfig) -> Self {
        Self {
            name: "local-caption".to_string(),
            command: LocalCommand::new(config),
        }
    }

    pub async fn is_available(&self) -> bool {
        self.command.is_available().await
    }

    async fn caption(&self, image: &ImageInput) -> Result<Caption> {
        if image.bytes.is_empty() {
            return Err(ProviderError::InvalidInput("image is empty".to_string()));
        }
        self.command.ensure_available().await?;

        let file = LocalCommand::write_temp(&image.bytes, &image.extension()).await?;
        let config = &self.command.config;
        let mut command = Command::new(&config.executable);
        if let Some(model) = &config.model_path {
            command.arg("--model").arg(model);
        }
        command.args(&config.args).arg(file.path());
        let text = self.command.run(&mut command).await?;

        Ok(Caption {
            text,
            confidence: 0.7,
        })
    }
}

#[async_trait]
impl Provider for LocalCaptioner {
    type Input = ImageInput;
    type Output = Caption;

    fn name(&self) -> &str {
        &self.name
    }

    fn operation(&self) -> &str {
        "caption"
    }

    #[instrument(skip(self, input), fields(file = %input.filename))]
    async fn invoke(&self, input: &ImageInput) -> Outcome<Caption> {
        self.caption(input).await.into()
    }
}
