//! Audit event plumbing.
//!
//! Every state-changing operation emits one event after its transaction
//! commits. Delivery is fire-and-forget: a send failure is logged and never
//! rolls back the business transaction.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Emits an audit event, logging (but not propagating) delivery failure.
    pub async fn emit(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "audit event dropped");
        }
    }
}

/// The events the domain services can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Purchase order events
    PurchaseOrderCreated(Uuid),
    PurchaseOrderItemAdded {
        order_id: Uuid,
        item_id: Uuid,
        new_total: Decimal,
    },
    PurchaseOrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PurchaseOrderApproved(Uuid),
    PurchaseOrderReceived {
        order_id: Uuid,
        lots_created: usize,
    },
    PurchaseOrderCancelled(Uuid),

    // Amendment events
    AmendmentProposed {
        order_id: Uuid,
        amendment_id: Uuid,
        amendment_number: i32,
    },
    AmendmentResolved {
        amendment_id: Uuid,
        approved: bool,
    },

    // Invoice events
    CompanyBillCreated(Uuid),
    VendorBillCreated(Uuid),
    InvoiceStatusChanged {
        invoice_id: Uuid,
        old_status: String,
        new_status: String,
    },
    InvoiceDeleted(Uuid),

    // Payment events
    PaymentRecorded {
        invoice_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
        payment_status: String,
    },
    BankWithdrawalPosted {
        bank_account_id: Uuid,
        amount: Decimal,
    },

    // Petty cash events
    PettyCashCardCreated(Uuid),
    PettyCashBalanceAdjusted {
        card_id: Uuid,
        amount: Decimal,
        direction: String,
    },
    ExpenseSubmitted {
        card_id: Uuid,
        expense_id: Uuid,
        amount: Decimal,
    },
    ExpenseResolved {
        expense_id: Uuid,
        approved: bool,
    },
}

/// Drains the event channel, recording each event to the audit log.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        info!(event = ?event, "audit");
    }
    info!("event channel closed; audit processor stopping");
}
