use thiserror::Error;

#[derive(Debug, Error)]
pub enum StudioError {
    /// Blocked before any request left the process.
    #[error("{0}")]
    Validation(String),
    /// The request failed or came back non-2xx.
    #[error("HTTP error: {detail}")]
    Transport {
        provider_message: Option<String>,
        detail: String,
    },
    /// The response arrived but reported failure.
    #[error("Rejected: {}", .message.as_deref().unwrap_or("no message"))]
    Rejected { message: Option<String> },
    #[error("Parse error: {0}")]
    Parse(String),
}

impl StudioError {
    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport { provider_message: None, detail: detail.into() }
    }

    pub fn rejected(message: Option<String>) -> Self {
        Self::Rejected { message: message.filter(|m| !m.trim().is_empty()) }
    }

    /// Flat banner text: the provider's own message wins, then a static
    /// fallback for the operation that failed.
    pub fn user_message(&self, op: Operation) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Transport { provider_message: Some(message), .. } => message.clone(),
            Self::Transport { provider_message: None, .. } | Self::Parse(_) => {
                op.transport_fallback().to_string()
            }
            Self::Rejected { message: Some(message) } => message.clone(),
            Self::Rejected { message: None } => op.semantic_fallback().to_string(),
        }
    }
}

/// The user action an error is reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    Analyze,
    Generate,
    Review,
}

impl Operation {
    fn transport_fallback(self) -> &'static str {
        match self {
            Self::Upload => "Failed to read the uploaded image.",
            Self::Analyze => "Failed to analyze image. Please try again.",
            Self::Generate => "Failed to generate images. Please try again.",
            Self::Review => "Failed to update the review.",
        }
    }

    fn semantic_fallback(self) -> &'static str {
        match self {
            Self::Upload => "Upload failed",
            Self::Analyze => "Analysis failed",
            Self::Generate => "Image generation failed",
            Self::Review => "Review failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn provider_message_wins_over_fallback() {
        let err = StudioError::Transport {
            provider_message: Some("Quota exceeded".into()),
            detail: "status=429".into(),
        };
        assert_eq!(err.user_message(Operation::Analyze), "Quota exceeded");
    }

    #[test]
    fn transport_without_message_uses_operation_fallback() {
        let err = StudioError::transport("connection refused");
        assert_eq!(
            err.user_message(Operation::Analyze),
            "Failed to analyze image. Please try again."
        );
        assert_eq!(
            err.user_message(Operation::Generate),
            "Failed to generate images. Please try again."
        );
    }

    #[test]
    fn blank_rejection_message_is_treated_as_absent() {
        let err = StudioError::rejected(Some("   ".into()));
        assert_eq!(err.user_message(Operation::Analyze), "Analysis failed");
    }
}
