use reqwest::StatusCode;

/// Failures talking to the chat completion service.
///
/// `Transport` covers anything that breaks the connection or stalls it;
/// `Upstream` and `Malformed` mean the service answered but not usefully.
#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    #[error("stream transport error: {0}")]
    Transport(String),

    #[error("upstream service error {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Malformed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
