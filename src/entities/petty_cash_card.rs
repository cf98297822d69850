use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "petty_cash_cards")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub card_number: String,
    pub assigned_user_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 3)))")]
    pub current_balance: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 3)))")]
    pub total_spent: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 3)))", nullable)]
    pub monthly_limit: Option<Decimal>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::petty_cash_expense::Entity")]
    PettyCashExpenses,
}

impl Related<super::petty_cash_expense::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PettyCashExpenses.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Active,
    Suspended,
    Expired,
    Closed,
}
