use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger record written alongside each inventory movement.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub material_id: Uuid,
    pub lot_id: Option<Uuid>,
    /// "receive" for purchase-order receipts.
    pub transaction_type: String,
    #[sea_orm(column_type = "Decimal(Some((16, 3)))")]
    pub quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 3)))")]
    pub unit_cost: Decimal,
    pub reference_id: Uuid,
    pub reference_type: String,
    pub performed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
