//! Fan-out dispatcher.
//!
//! Each source record becomes two work items, one per processor, published
//! to the processors' channels under the record's correlation id.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::{BusError, MessageBus, MessageBusExt, Result};
use crate::config::ChannelsConfig;
use crate::message::{Envelope, Payload, SourceRecord, WorkItem};

/// Sender id stamped on dispatched envelopes.
pub const DISPATCHER_ID: &str = "orchestrator";
/// Identity of the first processor.
pub const PROCESSOR_A: &str = "worker1";
/// Identity of the second processor.
pub const PROCESSOR_B: &str = "worker2";

/// Publishes work items for both processors.
pub struct Dispatcher {
    bus: Arc<dyn MessageBus>,
    channels: ChannelsConfig,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn MessageBus>, channels: ChannelsConfig) -> Self {
        Self { bus, channels }
    }

    /// Processor identities paired with the channel each one reads.
    pub fn routes(&self) -> [(&'static str, &str); 2] {
        [
            (PROCESSOR_A, self.channels.processor_a.as_str()),
            (PROCESSOR_B, self.channels.processor_b.as_str()),
        ]
    }

    /// Dispatch every record to both processors, in input order.
    ///
    /// Stops at the first publish failure and returns it; records already
    /// dispatched stay dispatched. Returns the number of records dispatched.
    #[tracing::instrument(name = "dispatch", skip_all, fields(records = records.len()))]
    pub async fn dispatch(
        &self,
        records: &[SourceRecord],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let trace_id = uuid::Uuid::new_v4().simple().to_string();

        for record in records {
            if cancel.is_cancelled() {
                info!("Dispatch cancelled");
                return Err(BusError::Cancelled);
            }

            let correlation_id = record.correlation_id();
            for (processor, channel) in self.routes() {
                let envelope = Envelope::traced(
                    DISPATCHER_ID,
                    channel,
                    Payload::WorkItem(WorkItem::new(record.clone(), processor)),
                    Some(trace_id.clone()),
                    correlation_id.as_str(),
                )?;
                self.bus.publish_envelope(&envelope).await?;
                debug!(
                    correlation_id = %correlation_id,
                    processor = %processor,
                    channel = %channel,
                    "Published work item"
                );
            }

            info!(
                title = %record.title,
                correlation_id = %correlation_id,
                "Dispatched record to both processors"
            );
        }

        Ok(records.len())
    }
}
