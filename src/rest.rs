//! Shared plumbing for the REST clients

use std::error::Error;
use std::fmt::{Display, Formatter};

use serde_json::Value;

/// A remote service answered with a non-2xx status (or an unreadable body).
///
/// The service's own error payload is kept verbatim, so the logs show what the service
/// actually complained about rather than just a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: u16,
    pub payload: Value,
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "HTTP status {}: {}", self.status, self.payload)
    }
}
impl Error for ApiError {}

/// Parse a response, turning any non-success status into an [`ApiError`] that carries the
/// service's error payload.
pub async fn expect_json(response: reqwest::Response) -> Result<Value, Box<dyn Error>> {
    let status = response.status();
    let body = response.text().await?;
    let payload: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => Value::String(body),
    };

    if status.is_success() == false {
        log::error!("Request failed: {}", payload);
        return Err(Box::new(ApiError {
            status: status.as_u16(),
            payload,
        }));
    }

    Ok(payload)
}

/// `value["key"]` as a string, defaulting to empty for missing or non-string values
pub fn str_of(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}
