use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Non-success HTTP response returned by the identity provider.
///
/// Displays as the raw response body, which may be empty.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{body}")]
pub struct ProviderError {
    /// HTTP status of the response
    pub status: StatusCode,
    /// Raw response body
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ResponseError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
}

/// Read a provider response, failing on non-success status and decoding the
/// JSON body with case-insensitive field names
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ResponseError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        tracing::warn!(status = status.as_u16(), "identity provider rejected the request");
        return Err(ProviderError { status, body }.into());
    }

    decode_case_insensitive(&body).map_err(ResponseError::Decode)
}

pub(crate) fn decode_case_insensitive<T: DeserializeOwned>(body: &str) -> serde_json::Result<T> {
    let value: Value = serde_json::from_str(body)?;
    serde_json::from_value(lowercase_keys(value))
}

fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key.to_ascii_lowercase(), lowercase_keys(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}
