use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{PipelineError, error::truncate_body};

use super::{BackendId, GenerationRequest, TextGenerationBackend, TextOutput};

pub const DEFAULT_PROGRAM: &str = "llama-cli";

/// Arguments passed to the model runner; `{model}`, `{max_tokens}` and
/// `{prompt}` are substituted per request.
pub fn default_args() -> Vec<String> {
    [
        "-m",
        "{model}",
        "-n",
        "{max_tokens}",
        "--no-display-prompt",
        "-p",
        "{prompt}",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Runs a locally installed model runner once per request and waits for it
/// to exit.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    program: String,
    model_path: Option<PathBuf>,
    args: Vec<String>,
}

impl LocalBackend {
    pub fn new(program: String, model_path: Option<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program,
            model_path,
            args,
        }
    }

    fn render_args(&self, request: &GenerationRequest) -> Result<Vec<String>, PipelineError> {
        let model = self.model_path.as_ref().map(|p| p.display().to_string());
        let max_tokens = request.max_tokens.to_string();

        self.args
            .iter()
            .map(|arg| {
                let mut rendered = arg.replace("{max_tokens}", &max_tokens);
                if rendered.contains("{model}") {
                    let model = model.as_deref().ok_or_else(|| {
                        PipelineError::generation_failed(
                            "no model file configured for local backend",
                        )
                    })?;
                    rendered = rendered.replace("{model}", model);
                }
                // Substituted last so prompt text is never re-scanned for placeholders.
                Ok(rendered.replace("{prompt}", &request.prompt))
            })
            .collect()
    }
}

#[async_trait]
impl TextGenerationBackend for LocalBackend {
    fn id(&self) -> BackendId {
        BackendId::Local
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<TextOutput, PipelineError> {
        let args = self.render_args(request)?;
        debug!(program = %self.program, "running local model");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PipelineError::generation_failed(format!("failed to start `{}`: {e}", self.program))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::generation_failed(format!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                truncate_body(stderr.trim())
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(TextOutput::Complete(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::collect_output;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.into(),
            max_tokens: 256,
        }
    }

    #[test]
    fn renders_placeholders() {
        let backend = LocalBackend::new(
            DEFAULT_PROGRAM.into(),
            Some(PathBuf::from("/models/llama.gguf")),
            default_args(),
        );

        let args = backend.render_args(&request("say {model}")).unwrap();

        assert_eq!(
            args,
            vec![
                "-m",
                "/models/llama.gguf",
                "-n",
                "256",
                "--no-display-prompt",
                "-p",
                "say {model}"
            ]
        );
    }

    #[test]
    fn missing_model_path_is_generation_failed() {
        let backend = LocalBackend::new(DEFAULT_PROGRAM.into(), None, default_args());
        let err = backend.render_args(&request("x")).unwrap_err();
        assert!(matches!(err, PipelineError::GenerationFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn returns_trimmed_stdout() {
        let backend = LocalBackend::new("echo".into(), None, vec!["{prompt}".into()]);

        let output = backend.generate(&request("Wear a coat.")).await.unwrap();
        assert_eq!(collect_output(output).await.unwrap(), "Wear a coat.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let backend = LocalBackend::new(
            "sh".into(),
            None,
            vec!["-c".into(), "echo model exploded >&2; exit 3".into()],
        );

        let err = backend.generate(&request("x")).await.unwrap_err();
        assert!(err.to_string().contains("model exploded"));
    }

    #[tokio::test]
    async fn missing_program_is_generation_failed() {
        let backend = LocalBackend::new(
            "skycast-no-such-model-runner".into(),
            None,
            vec!["{prompt}".into()],
        );

        let err = backend.generate(&request("x")).await.unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }
}
