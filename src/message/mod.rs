//! Message model shared by every hop of the pipeline.
//!
//! This module contains:
//! - `Envelope`: immutable wrapper stamped with sender, channel and correlation
//! - `Payload`: the closed set of payload kinds flowing over channels
//! - Domain records: `SourceRecord`, `WorkItem`, `ScoreResult`, `ConsolidatedRecord`

mod envelope;
mod model;

pub use envelope::{Envelope, EnvelopeError};
pub use model::{
    correlation_id_for, ConsolidatedRecord, Payload, ScoreResult, SourceRecord, WorkItem,
    TANDEM_UUID_NAMESPACE,
};

#[cfg(test)]
mod tests;
