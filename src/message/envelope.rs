//! Per-hop message envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Errors raised while constructing an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Envelope recipient channel must not be empty")]
    EmptyRecipient,

    #[error("Envelope correlation id must not be empty")]
    EmptyCorrelation,
}

/// Immutable wrapper around one payload travelling over one channel.
///
/// Created once per hop by the sender and never mutated afterwards. The
/// `trace_id` and `correlation_id` are carried unchanged into replies so a
/// unit of work can be followed from dispatch to aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    from: String,
    to: String,
    payload: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    correlation_id: String,
    created_at: DateTime<Utc>,
}

impl<T> Envelope<T> {
    /// Create an envelope addressed to `to`.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        payload: T,
        correlation_id: impl Into<String>,
    ) -> Result<Self, EnvelopeError> {
        Self::build(from.into(), to.into(), payload, None, correlation_id.into())
    }

    /// Create an envelope that carries a trace id.
    pub fn traced(
        from: impl Into<String>,
        to: impl Into<String>,
        payload: T,
        trace_id: Option<String>,
        correlation_id: impl Into<String>,
    ) -> Result<Self, EnvelopeError> {
        Self::build(from.into(), to.into(), payload, trace_id, correlation_id.into())
    }

    fn build(
        from: String,
        to: String,
        payload: T,
        trace_id: Option<String>,
        correlation_id: String,
    ) -> Result<Self, EnvelopeError> {
        if to.trim().is_empty() {
            return Err(EnvelopeError::EmptyRecipient);
        }
        if correlation_id.is_empty() {
            return Err(EnvelopeError::EmptyCorrelation);
        }
        Ok(Self {
            from,
            to,
            payload,
            trace_id,
            correlation_id,
            created_at: Utc::now(),
        })
    }

    /// Build the next hop's envelope, keeping trace and correlation ids.
    pub fn reply<U>(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: U,
    ) -> Result<Envelope<U>, EnvelopeError> {
        Envelope::build(
            from.into(),
            to.into(),
            payload,
            self.trace_id.clone(),
            self.correlation_id.clone(),
        )
    }

    /// Check the recipient invariant.
    ///
    /// Deserialized envelopes bypass the constructor, so publishers re-check
    /// before handing one to a transport.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.to.trim().is_empty() {
            return Err(EnvelopeError::EmptyRecipient);
        }
        if self.correlation_id.is_empty() {
            return Err(EnvelopeError::EmptyCorrelation);
        }
        Ok(())
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
