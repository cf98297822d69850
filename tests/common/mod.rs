#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DbBackend, Schema, Set,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use procure_api::{
    auth::{consts, RequestContext},
    config::AppConfig,
    db::DbPool,
    entities::{
        bank_account, bank_transaction, inventory_lot, inventory_transaction, invoice,
        invoice_payment, petty_cash_card, petty_cash_expense, purchase_order,
        purchase_order_amendment, purchase_order_item,
    },
    events::EventSender,
    AppServices,
};

/// Harness backed by an in-memory SQLite database with the full schema
/// derived from the entity definitions.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
        opts.max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5))
            .sqlx_logging(false);
        let db = Database::connect(opts)
            .await
            .expect("failed to open in-memory database");

        let schema = Schema::new(DbBackend::Sqlite);
        macro_rules! create_table {
            ($entity:expr) => {
                let stmt = schema.create_table_from_entity($entity);
                db.execute(db.get_database_backend().build(&stmt))
                    .await
                    .expect("failed to create table");
            };
        }
        create_table!(purchase_order::Entity);
        create_table!(purchase_order_item::Entity);
        create_table!(purchase_order_amendment::Entity);
        create_table!(invoice::Entity);
        create_table!(invoice_payment::Entity);
        create_table!(bank_account::Entity);
        create_table!(bank_transaction::Entity);
        create_table!(inventory_lot::Entity);
        create_table!(inventory_transaction::Entity);
        create_table!(petty_cash_card::Entity);
        create_table!(petty_cash_expense::Entity);

        let (event_tx, mut event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        let cfg = AppConfig::new("sqlite::memory:");
        let db = Arc::new(db);
        let services = AppServices::new(db.clone(), event_sender, &cfg);

        Self {
            db,
            services,
            _event_task: event_task,
        }
    }
}

/// A request context holding every permission the services check.
pub fn manager_ctx() -> RequestContext {
    RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), "manager").with_permissions(vec![
        consts::MANAGE_ORDERS,
        consts::APPROVE_AMENDMENTS,
        consts::MANAGE_INVOICES,
        consts::RECORD_PAYMENTS,
        consts::MANAGE_EXPENSES,
    ])
}

/// A context for a specific user with no elevated permissions.
pub fn user_ctx(user_id: Uuid) -> RequestContext {
    RequestContext::new(user_id, Uuid::new_v4(), "employee")
}

pub fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

/// Seeds a bank account and returns its id.
pub async fn seed_bank_account(db: &DbPool, balance: Decimal) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();
    bank_account::ActiveModel {
        id: Set(id),
        account_name: Set("Operating".to_string()),
        account_number: Set(Some(format!("ACC-{}", &id.to_string()[..8]))),
        balance: Set(balance),
        currency: Set("USD".to_string()),
        created_at: Set(now),
        updated_at: Set(Some(now)),
        version: Set(1),
    }
    .insert(db)
    .await
    .expect("failed to seed bank account");
    id
}

pub fn money(value: &str) -> Decimal {
    value.parse().expect("valid decimal literal")
}
