#![forbid(unsafe_code)]

//! Procurement and finance back-office core.
//!
//! Services own the business rules: purchase-order lifecycle, amendment
//! workflow, the company/vendor invoice ledger, payment reconciliation,
//! and the petty-cash ledger. Handlers stay thin; every mutation runs
//! inside a database transaction and emits an audit event after commit.

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod money;
pub mod services;

use std::sync::Arc;

use serde::Serialize;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    AmendmentService, InvoicingService, PaymentService, PettyCashService, PurchaseOrderService,
};

/// The service bundle handlers resolve their dependencies from.
#[derive(Clone)]
pub struct AppServices {
    pub purchase_orders: PurchaseOrderService,
    pub amendments: AmendmentService,
    pub invoicing: InvoicingService,
    pub payments: PaymentService,
    pub petty_cash: PettyCashService,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, config: &AppConfig) -> Self {
        Self {
            purchase_orders: PurchaseOrderService::new(
                db.clone(),
                event_sender.clone(),
                config.tax_rate,
            ),
            amendments: AmendmentService::new(db.clone(), event_sender.clone(), config.tax_rate),
            invoicing: InvoicingService::new(db.clone(), event_sender.clone()),
            payments: PaymentService::new(
                db.clone(),
                event_sender.clone(),
                config.payment_tolerance,
            ),
            petty_cash: PettyCashService::new(db, event_sender),
        }
    }
}

/// Shared state for the axum router.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub services: AppServices,
    pub event_sender: EventSender,
}

/// Standard success envelope for API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
