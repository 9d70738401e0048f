//! Consumption ledger
//!
//! Appends one row per acknowledgment. The ledger trusts its caller: it does
//! not check that the message exists or was delivered to the consumer, and it
//! never deduplicates.

use std::sync::Arc;

use tracing::{error, info};

use crate::broker::message::Consumption;
use crate::broker::notifier::{AdminEvent, AdminNotifier};
use crate::broker::now_millis;
use crate::persistence::Storage;
use crate::utils::Result;

pub struct ConsumptionLedger {
    store: Arc<dyn Storage>,
    notifier: AdminNotifier,
}

impl ConsumptionLedger {
    pub fn new(store: Arc<dyn Storage>, notifier: AdminNotifier) -> Self {
        Self { store, notifier }
    }

    pub fn record_consumption(
        &self,
        consumer: &str,
        topic: &str,
        message_id: &str,
        payload: &str,
    ) -> Result<Consumption> {
        let consumption = Consumption {
            consumer: consumer.to_string(),
            topic: topic.to_string(),
            message_id: message_id.to_string(),
            message: payload.to_string(),
            timestamp: now_millis(),
        };

        if let Err(e) = self.store.append_consumption(&consumption) {
            error!(consumer, message_id, "failed to record consumption: {e}");
            return Err(e);
        }

        info!(consumer, topic, message_id, "consumption recorded");
        self.notifier.notify(AdminEvent::consumed(&consumption));
        Ok(consumption)
    }

    pub fn consumptions(&self) -> Result<Vec<Consumption>> {
        self.store.consumptions()
    }
}

impl std::fmt::Debug for ConsumptionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumptionLedger").finish_non_exhaustive()
    }
}
