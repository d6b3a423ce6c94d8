use std::{collections::VecDeque, fmt::Display, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use reqwest::{Client, header::ACCEPT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{PipelineError, error::truncate_body};

use super::{
    BackendId, FragmentStream, GenerationRequest, TextGenerationBackend, TextOutput,
    sse::{SseDecoder, SseEvent},
};

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";
pub const DEFAULT_MODEL: &str = "meta/meta-llama-3-8b-instruct";

/// Streams predictions from Replicate over server-sent events.
#[derive(Debug, Clone)]
pub struct ReplicateBackend {
    http: Client,
    api_token: String,
    base_url: String,
    model: String,
}

impl ReplicateBackend {
    pub fn new(api_token: String, model: String, timeout: Duration) -> anyhow::Result<Self> {
        // No total timeout: the event stream stays open for the whole generation.
        // Each read is bounded instead, so a stalled server still fails.
        let http = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .context("Failed to build HTTP client for Replicate")?;

        Ok(Self {
            http,
            api_token,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn create_prediction(
        &self,
        request: &GenerationRequest,
    ) -> Result<String, PipelineError> {
        let url = format!(
            "{}/models/{}/predictions",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let body = CreatePredictionRequest {
            input: PredictionInput {
                prompt: &request.prompt,
                max_new_tokens: request.max_tokens,
            },
            stream: true,
        };

        let res = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                PipelineError::generation_failed(format!("Replicate request failed: {e}"))
            })?;

        let status = res.status();
        let text = res.text().await.map_err(|e| {
            PipelineError::generation_failed(format!("failed to read Replicate response body: {e}"))
        })?;

        if !status.is_success() {
            return Err(PipelineError::generation_failed(format!(
                "Replicate returned {status}: {}",
                error_detail(&text)
            )));
        }

        let prediction: PredictionResponse = serde_json::from_str(&text).map_err(|e| {
            PipelineError::generation_failed(format!("failed to parse Replicate prediction: {e}"))
        })?;

        if let Some(error) = prediction.error.filter(|e| !e.is_null()) {
            return Err(PipelineError::generation_failed(format!(
                "Replicate prediction failed: {}",
                value_text(&error)
            )));
        }

        prediction
            .urls
            .and_then(|urls| urls.stream)
            .ok_or_else(|| {
                PipelineError::generation_failed("Replicate prediction has no stream URL")
            })
    }

    async fn open_stream(&self, url: &str) -> Result<FragmentStream, PipelineError> {
        let res = self
            .http
            .get(url)
            .bearer_auth(&self.api_token)
            .header(ACCEPT, "text/event-stream")
            .header("Cache-Control", "no-store")
            .send()
            .await
            .map_err(|e| {
                PipelineError::generation_failed(format!("failed to open Replicate stream: {e}"))
            })?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(PipelineError::generation_failed(format!(
                "Replicate stream returned {status}: {}",
                error_detail(&text)
            )));
        }

        let body = res.bytes_stream().map(|chunk| chunk.map(|bytes| bytes.to_vec()));
        Ok(sse_fragments(Box::pin(body)))
    }
}

#[async_trait]
impl TextGenerationBackend for ReplicateBackend {
    fn id(&self) -> BackendId {
        BackendId::Replicate
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<TextOutput, PipelineError> {
        debug!(
            model = %self.model,
            max_tokens = request.max_tokens,
            "creating Replicate prediction"
        );
        let stream_url = self.create_prediction(request).await?;
        debug!(%stream_url, "streaming Replicate output");
        let fragments = self.open_stream(&stream_url).await?;
        Ok(TextOutput::Fragments(fragments))
    }
}

struct SseFragments<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    eof: bool,
    finished: bool,
}

/// Maps a Replicate event stream onto output fragments.
///
/// `output` events are fragments, `done` ends the stream and `error` ends it
/// with a [`PipelineError::GenerationFailed`].
pub(crate) fn sse_fragments<S, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<Vec<u8>, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    let state = SseFragments {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        eof: false,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }

            if let Some(event) = st.pending.pop_front() {
                match event.event.as_str() {
                    "output" | "message" => return Some((Ok(event.data), st)),
                    "error" => {
                        st.finished = true;
                        let err = PipelineError::generation_failed(format!(
                            "Replicate stream error: {}",
                            error_detail(&event.data)
                        ));
                        return Some((Err(err), st));
                    }
                    "done" => {
                        st.finished = true;
                        return done_reason(&event.data)
                            .map(|reason| {
                                PipelineError::generation_failed(format!(
                                    "Replicate prediction ended early: {reason}"
                                ))
                            })
                            .map(|err| (Err(err), st));
                    }
                    _ => continue,
                }
            }

            if st.eof {
                return None;
            }

            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.push(&chunk);
                    st.pending.extend(events);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    let err = PipelineError::generation_failed(format!(
                        "Replicate stream interrupted: {e}"
                    ));
                    return Some((Err(err), st));
                }
                None => {
                    st.eof = true;
                    st.pending.extend(st.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

/// `done` carries `{"reason": "canceled" | "error"}` when the prediction did
/// not complete normally.
fn done_reason(data: &str) -> Option<String> {
    let value: Value = serde_json::from_str(data).ok()?;
    let reason = value.get("reason")?.as_str()?;
    if reason.is_empty() {
        None
    } else {
        Some(reason.to_string())
    }
}

fn error_detail(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => value
            .get("detail")
            .or_else(|| value.get("error"))
            .map(value_text)
            .unwrap_or_else(|| truncate_body(body)),
        Err(_) if body.trim().is_empty() => "no details".to_string(),
        Err(_) => truncate_body(body),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct CreatePredictionRequest<'a> {
    input: PredictionInput<'a>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    max_new_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    urls: Option<PredictionUrls>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    stream: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::collect_output;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chunks(
        parts: &[&str],
    ) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + Unpin + 'static {
        let owned: Vec<Result<Vec<u8>, std::io::Error>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    async fn collect(body: &[&str]) -> Result<String, PipelineError> {
        collect_output(TextOutput::Fragments(sse_fragments(chunks(body)))).await
    }

    #[tokio::test]
    async fn output_events_become_fragments() {
        let text = collect(&[
            "event: output\ndata: Wear \n\n",
            "event: output\ndata: a coat.\n\n",
            "event: done\ndata: {}\n\n",
        ])
        .await
        .unwrap();

        assert_eq!(text, "Wear a coat.");
    }

    #[tokio::test]
    async fn events_after_done_are_ignored() {
        let text = collect(&[
            "event: output\ndata: Hat.\n\nevent: done\ndata: {}\n\nevent: output\ndata: extra\n\n",
        ])
        .await
        .unwrap();

        assert_eq!(text, "Hat.");
    }

    #[tokio::test]
    async fn error_event_is_generation_failed() {
        let err = collect(&[
            "event: output\ndata: Wear \n\n",
            "event: error\ndata: {\"detail\": \"out of memory\"}\n\n",
        ])
        .await
        .unwrap_err();

        assert_eq!(
            err,
            PipelineError::generation_failed("Replicate stream error: out of memory")
        );
    }

    #[tokio::test]
    async fn canceled_prediction_is_generation_failed() {
        let err = collect(&["event: done\ndata: {\"reason\": \"canceled\"}\n\n"])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("ended early: canceled"));
    }

    #[tokio::test]
    async fn body_error_interrupts_stream() {
        let body = stream::iter(vec![
            Ok(b"event: output\ndata: Wear \n\n".to_vec()),
            Err(std::io::Error::other("connection reset")),
        ]);

        let err = collect_output(TextOutput::Fragments(sse_fragments(body)))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn streams_prediction_from_server() {
        let server = MockServer::start().await;
        let stream_url = format!("{}/stream/abc123", server.uri());

        Mock::given(method("POST"))
            .and(path("/models/meta/meta-llama-3-8b-instruct/predictions"))
            .and(header("Authorization", "Bearer r8_test"))
            .and(body_partial_json(json!({
                "stream": true,
                "input": {"prompt": "What should I wear?", "max_new_tokens": 64}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "abc123",
                "status": "starting",
                "urls": {"stream": stream_url}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/stream/abc123"))
            .and(header("Accept", "text/event-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/event-stream")
                    .set_body_string(concat!(
                        "event: output\ndata: Wear \n\n",
                        "event: output\ndata: a coat.\n\n",
                        "event: done\ndata: {}\n\n",
                    )),
            )
            .mount(&server)
            .await;

        let backend = ReplicateBackend::new(
            "r8_test".into(),
            DEFAULT_MODEL.into(),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_base_url(server.uri());

        let output = backend
            .generate(&GenerationRequest {
                prompt: "What should I wear?".into(),
                max_tokens: 64,
            })
            .await
            .unwrap();

        assert_eq!(collect_output(output).await.unwrap(), "Wear a coat.");
    }

    #[tokio::test]
    async fn rejected_prediction_surfaces_provider_detail() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"detail": "Invalid token."})),
            )
            .mount(&server)
            .await;

        let backend =
            ReplicateBackend::new("bad".into(), DEFAULT_MODEL.into(), Duration::from_secs(5))
                .unwrap()
                .with_base_url(server.uri());

        let err = backend
            .generate(&GenerationRequest {
                prompt: "x".into(),
                max_tokens: 8,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::GenerationFailed(_)));
        assert!(err.to_string().contains("Invalid token."));
    }

    #[tokio::test]
    async fn stalled_stream_times_out() {
        let server = MockServer::start().await;
        let stream_url = format!("{}/stream/slow", server.uri());

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "slow",
                "urls": {"stream": stream_url}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/stream/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/event-stream")
                    .set_body_string("event: output\ndata: hi\n\nevent: done\ndata: {}\n\n")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let backend = ReplicateBackend::new(
            "r8_test".into(),
            DEFAULT_MODEL.into(),
            Duration::from_millis(300),
        )
        .unwrap()
        .with_base_url(server.uri());

        let started = std::time::Instant::now();
        let result = match backend
            .generate(&GenerationRequest {
                prompt: "x".into(),
                max_tokens: 8,
            })
            .await
        {
            Ok(output) => collect_output(output).await,
            Err(err) => Err(err),
        };

        assert!(matches!(result, Err(PipelineError::GenerationFailed(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
