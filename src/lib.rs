//! Tandem - paired scoring pipeline
//!
//! Fans each source record out to two independent processors over named
//! message channels and fans their scores back in through an aggregator
//! that emits one consolidated record per correlation id. The transport is
//! either an in-process channel bus or a durable, polling queue service.

pub mod aggregator;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod message;
pub mod processor;
pub mod report;
pub mod scoring;
pub mod source;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;
