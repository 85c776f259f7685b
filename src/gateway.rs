use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::entities::order::OrderWithItems;

/// Outcome of one gateway charge attempt. Declines and faults both feed the
/// retry path, but callers must be able to tell them apart, so faults are a
/// variant rather than an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Approved { reference: String },
    Declined { reason: String },
    Fault { error: String },
}

/// Opaque external payment capability. Callers bound the call with
/// `tokio::time::timeout` and treat the elapsed timer as a fault.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn pay(&self, order: &OrderWithItems) -> GatewayOutcome;
}

/// Stand-in gateway with configurable decline and fault rates. The real
/// client is an external integration wired in behind the same trait.
pub struct SimulatedGateway {
    decline_rate: f64,
    fault_rate: f64,
}

impl SimulatedGateway {
    pub fn new(decline_rate: f64, fault_rate: f64) -> Self {
        Self {
            decline_rate,
            fault_rate,
        }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn pay(&self, order: &OrderWithItems) -> GatewayOutcome {
        let draw: f64 = rand::random();
        let outcome = if draw < self.fault_rate {
            GatewayOutcome::Fault {
                error: "simulated gateway outage".to_string(),
            }
        } else if draw < self.fault_rate + self.decline_rate {
            GatewayOutcome::Declined {
                reason: "insufficient funds".to_string(),
            }
        } else {
            GatewayOutcome::Approved {
                reference: format!("SIM-{}", Uuid::new_v4().simple()),
            }
        };
        debug!(order_id = %order.order.id, total = %order.total(), ?outcome, "simulated gateway call");
        outcome
    }
}
