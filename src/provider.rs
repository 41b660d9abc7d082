//! Transcription provider boundary
//!
//! The orchestration core only sees the [`TranscriptionProvider`] trait. The
//! bundled [`CommandProvider`] runs an external recognition command once per
//! job and parses what it prints on stdout.

use async_trait::async_trait;
use log::{debug, warn};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use crate::config::ProviderConfig;
use crate::models::{AudioInput, FailureKind, Segment, TranscriptionParams};
use crate::result_parser::parse_raw_result;

/// Exit code the recognition command uses for rejected input
const EXIT_INVALID_INPUT: i32 = 2;

/// Failure reported by a provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Network or service failure, a later attempt may succeed
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// The input was rejected, retrying will not help
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Transient(_) => FailureKind::ProviderTransient,
            Self::Permanent(_) => FailureKind::ProviderPermanent,
        }
    }
}

/// External speech recognition service
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Transcribe `audio`. `deadline` is the time the caller is willing to
    /// wait; the caller stops waiting on its own once it elapses.
    async fn transcribe(
        &self,
        audio: &AudioInput,
        params: &TranscriptionParams,
        deadline: Duration,
    ) -> Result<Vec<Segment>, ProviderError>;
}

/// Provider backed by an external recognition command
#[derive(Debug, Clone)]
pub struct CommandProvider {
    config: ProviderConfig,
}

impl CommandProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, audio: &AudioInput, params: &TranscriptionParams) -> Command {
        let engine_model = if params.engine_model.is_empty() {
            &self.config.engine_model
        } else {
            &params.engine_model
        };

        let mut command = Command::new(&self.config.command_path);
        command
            .arg(&audio.path)
            .arg("--engine_model")
            .arg(engine_model);
        if params.speaker_diarization {
            command.arg("--speaker_diarization");
        }
        if params.emotion_recognition {
            command.arg("--emotion_recognition");
        }
        command
            .args(&self.config.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future (worker timeout) kills the child
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl TranscriptionProvider for CommandProvider {
    async fn transcribe(
        &self,
        audio: &AudioInput,
        params: &TranscriptionParams,
        deadline: Duration,
    ) -> Result<Vec<Segment>, ProviderError> {
        debug!(
            "Running {} on {} (deadline {}s)",
            self.config.command_path,
            audio.path.display(),
            deadline.as_secs()
        );

        let output = self
            .build_command(audio, params)
            .output()
            .await
            .map_err(|e| ProviderError::Transient(format!("Failed to run command: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                "Recognition command exited with {} for {}",
                output.status,
                audio.path.display()
            );
            return Err(match output.status.code() {
                Some(EXIT_INVALID_INPUT) => ProviderError::Permanent(stderr),
                _ => ProviderError::Transient(stderr),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_raw_result(&stdout).map_err(|e| ProviderError::Permanent(e.to_string()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// `sh` runs the "audio" path as a script, which lets a test fake the
    /// recognition command's output and exit status.
    fn script(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "transcribe_api_{}_{}.sh",
            name,
            uuid::Uuid::new_v4()
        ));
        std::fs::write(&path, body).unwrap();
        path
    }

    fn sh_provider() -> CommandProvider {
        CommandProvider::new(ProviderConfig {
            command_path: "sh".into(),
            ..ProviderConfig::default()
        })
    }

    async fn run(body: &str) -> Result<Vec<Segment>, ProviderError> {
        let path = script("provider", body);
        let audio = AudioInput::from_bytes(&path, body.as_bytes());
        let result = sh_provider()
            .transcribe(&audio, &TranscriptionParams::default(), Duration::from_secs(5))
            .await;
        let _ = std::fs::remove_file(&path);
        result
    }

    #[test]
    fn command_line_reflects_parameters() {
        let provider = CommandProvider::new(ProviderConfig::default());
        let params = TranscriptionParams {
            speaker_diarization: true,
            emotion_recognition: false,
            engine_model: String::new(),
        };
        let audio = AudioInput::from_bytes("/tmp/audio.wav", b"");
        let command = provider.build_command(&audio, &params);
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["/tmp/audio.wav", "--engine_model", "16k_zh", "--speaker_diarization"]
        );
    }

    #[tokio::test]
    async fn stdout_is_parsed_into_segments() {
        let segments = run("echo '[{\"FinalSentence\": \"hi\", \"StartMs\": 500}]'")
            .await
            .unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hi");
        assert_eq!(segments[0].start_time, 0.5);
    }

    #[tokio::test]
    async fn invalid_input_exit_code_is_permanent() {
        let err = run("echo 'unsupported format' >&2; exit 2").await.unwrap_err();
        assert_eq!(err, ProviderError::Permanent("unsupported format".into()));
    }

    #[tokio::test]
    async fn other_exit_codes_are_transient() {
        let err = run("exit 1").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn empty_output_is_permanent() {
        let err = run("true").await.unwrap_err();
        assert!(matches!(err, ProviderError::Permanent(_)));
    }

    #[tokio::test]
    async fn missing_executable_is_transient() {
        let provider = CommandProvider::new(ProviderConfig {
            command_path: "/nonexistent/recognizer".into(),
            ..ProviderConfig::default()
        });
        let audio = AudioInput::from_bytes("/tmp/audio.wav", b"");
        let err = provider
            .transcribe(&audio, &TranscriptionParams::default(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn failure_kinds_follow_error_variant() {
        assert_eq!(
            ProviderError::Transient("x".into()).failure_kind(),
            FailureKind::ProviderTransient
        );
        assert_eq!(
            ProviderError::Permanent("x".into()).failure_kind(),
            FailureKind::ProviderPermanent
        );
    }
}
