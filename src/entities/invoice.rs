use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Both bill kinds live in one table, discriminated by `bill_type`.
///
/// Company bills mirror a single purchase order's cost and are never
/// directly payable; vendor bills are the payable documents and carry the
/// payment ledger columns.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_invoices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub invoice_number: String,

    pub bill_type: String,
    pub supplier_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub project_id: Option<Uuid>,

    /// Company bills only: the mirrored purchase order.
    pub purchase_order_id: Option<Uuid>,

    /// Vendor bills only: covered company-bill ids (preferred workflow).
    #[sea_orm(column_type = "Json", nullable)]
    pub covers_company_bills: Option<Json>,
    /// Vendor bills only: covered purchase-order ids (legacy workflow).
    #[sea_orm(column_type = "Json", nullable)]
    pub covers_purchase_orders: Option<Json>,

    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub payment_terms_days: Option<i32>,

    #[sea_orm(column_type = "Decimal(Some((16, 3)))")]
    pub invoice_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 3)))")]
    pub paid_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 3)))")]
    pub balance_due: Decimal,

    /// Company bills only: draft | sent.
    pub bill_status: Option<String>,
    /// Vendor bills only: unpaid | partial | paid | overdue.
    pub payment_status: Option<String>,

    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::invoice_payment::Entity")]
    InvoicePayments,
}

impl Related<super::invoice_payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InvoicePayments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillType {
    Company,
    Vendor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CompanyBillStatus {
    Draft,
    Sent,
}

impl Model {
    pub fn is_company_bill(&self) -> bool {
        self.bill_type == BillType::Company.to_string()
    }

    pub fn is_vendor_bill(&self) -> bool {
        self.bill_type == BillType::Vendor.to_string()
    }

    /// Decodes a JSON coverage column into ids; an absent column is empty.
    pub fn coverage_ids(column: &Option<Json>) -> Vec<Uuid> {
        column
            .as_ref()
            .and_then(|v| serde_json::from_value::<Vec<Uuid>>(v.clone()).ok())
            .unwrap_or_default()
    }
}
