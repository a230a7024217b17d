use std::fmt::Display;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::MessageError;
use crate::job::{DEFAULT_MAX_RETRIES, JobId, JobPriority, JobRecord};

/// Body of a queue message. Serialized as camelCase JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub job_id: JobId,
    pub url: String,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl QueueMessage {
    pub fn for_job(record: &JobRecord) -> Self {
        Self {
            job_id: record.id,
            url: record.url.clone(),
            priority: record.priority,
            retry_count: record.retry_count,
            max_retries: record.max_retries,
            error: record.error_message.clone(),
        }
    }

    /// Decode a body and validate its target url.
    pub fn parse(body: &str) -> Result<(Self, Url), MessageError> {
        let message: Self = serde_json::from_str(body)?;
        let url = validate_url(&message.url)?;
        Ok((message, url))
    }

    pub fn to_body(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The message a retry re-enqueues: same job, bumped count, last error.
    pub fn next_attempt(&self, retry_count: u32, error: impl Into<String>) -> Self {
        Self {
            retry_count,
            error: Some(error.into()),
            ..self.clone()
        }
    }
}

/// Accept only absolute `http`/`https` urls.
pub fn validate_url(raw: &str) -> Result<Url, MessageError> {
    let url = Url::parse(raw).map_err(|err| MessageError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        "http" | "https" => Err(MessageError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        }),
        scheme => Err(MessageError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme `{scheme}`"),
        }),
    }
}

/// Identifier the queue assigns on send.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle for acknowledging one delivery of a message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeliveryReceipt(String);

impl DeliveryReceipt {
    pub fn new(receipt: impl Into<String>) -> Self {
        Self(receipt.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeliveryReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One delivery as handed out by [`QueuePort::receive`](crate::queue::QueuePort::receive).
#[derive(Clone, Debug)]
pub struct Envelope {
    pub body: Option<String>,
    pub receipt: DeliveryReceipt,
    /// Times the queue has handed this message out, this delivery included.
    pub delivery_count: u32,
}

impl Envelope {
    pub fn decode(&self) -> Result<(QueueMessage, Url), MessageError> {
        let body = self
            .body
            .as_deref()
            .filter(|body| !body.trim().is_empty())
            .ok_or(MessageError::MissingBody)?;
        QueueMessage::parse(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(body: Option<&str>) -> Envelope {
        Envelope {
            body: body.map(str::to_string),
            receipt: DeliveryReceipt::new("r-1"),
            delivery_count: 1,
        }
    }

    #[test]
    fn test_parse_applies_defaults() {
        let id = JobId::new();
        let body = format!(r#"{{"jobId":"{id}","url":"https://example.com/a"}}"#);
        let (message, url) = QueueMessage::parse(&body).unwrap();

        assert_eq!(message.job_id, id);
        assert_eq!(message.priority, JobPriority::Medium);
        assert_eq!(message.retry_count, 0);
        assert_eq!(message.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(url.as_str(), "https://example.com/a");
    }

    #[test]
    fn test_body_uses_camel_case() {
        let record = JobRecord::new("https://example.com", JobPriority::High, 5);
        let message = QueueMessage::for_job(&record).next_attempt(2, "timeout");
        let value: serde_json::Value =
            serde_json::from_str(&message.to_body().unwrap()).unwrap();

        assert_eq!(value["jobId"], record.id.to_string());
        assert_eq!(value["retryCount"], 2);
        assert_eq!(value["maxRetries"], 5);
        assert_eq!(value["priority"], "high");
        assert_eq!(value["error"], "timeout");
    }

    #[test]
    fn test_decode_rejects_unusable_bodies() {
        assert!(matches!(
            envelope(None).decode(),
            Err(MessageError::MissingBody)
        ));
        assert!(matches!(
            envelope(Some("  ")).decode(),
            Err(MessageError::MissingBody)
        ));
        assert!(matches!(
            envelope(Some("{not json")).decode(),
            Err(MessageError::Malformed(_))
        ));

        let body = format!(r#"{{"jobId":"{}","url":"ftp://host/x"}}"#, JobId::new());
        assert!(matches!(
            envelope(Some(&body)).decode(),
            Err(MessageError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("http://example.com").is_ok());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("mailto:someone@example.com").is_err());
    }
}
