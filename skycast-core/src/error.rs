use thiserror::Error;

/// Failures a single forecast request can run into.
///
/// Each variant is terminal for the stage that produced it; the pipeline
/// reports it and moves on without retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The weather provider answered with a non-success status, or with a
    /// 200 that carries an embedded error code.
    #[error("{}", fetch_failed_message(.status, .message))]
    FetchFailed {
        status: Option<u16>,
        message: String,
    },

    /// The provider response did not have the expected shape.
    #[error("Malformed forecast response: {0}")]
    MalformedResponse(String),

    /// The text-generation backend reported an error.
    #[error("Recommendation generation failed: {0}")]
    GenerationFailed(String),
}

impl PipelineError {
    pub fn fetch_failed(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::FetchFailed {
            status,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    pub fn generation_failed(message: impl Into<String>) -> Self {
        Self::GenerationFailed(message.into())
    }
}

fn fetch_failed_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("Forecast request failed with status {code}: {message}"),
        None => format!("Forecast request failed: {message}"),
    }
}

/// Cuts long provider bodies down before they end up in an error message.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failed_display_includes_status_and_message() {
        let err = PipelineError::fetch_failed(Some(404), "city not found");
        assert_eq!(
            err.to_string(),
            "Forecast request failed with status 404: city not found"
        );
    }

    #[test]
    fn fetch_failed_display_without_status() {
        let err = PipelineError::fetch_failed(None, "connection refused");
        assert_eq!(err.to_string(), "Forecast request failed: connection refused");
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let body = "é".repeat(150);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 203);
    }

    #[test]
    fn truncate_body_keeps_short_bodies() {
        assert_eq!(truncate_body("short"), "short");
    }
}
