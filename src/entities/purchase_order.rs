use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub order_number: String,

    pub supplier_id: Uuid,
    pub project_id: Option<Uuid>,
    pub status: String,
    pub payment_status: Option<String>,

    #[sea_orm(column_type = "Decimal(Some((16, 3)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 3)))")]
    pub tax_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 3)))")]
    pub shipping_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 3)))")]
    pub discount_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 3)))")]
    pub total_amount: Decimal,

    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Append-only audit trail of status-change annotations.
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::purchase_order_item::Entity")]
    PurchaseOrderItems,
    #[sea_orm(has_many = "super::purchase_order_amendment::Entity")]
    PurchaseOrderAmendments,
}

impl Related<super::purchase_order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrderItems.def()
    }
}

impl Related<super::purchase_order_amendment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrderAmendments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Purchase order lifecycle states.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PoStatus {
    Draft,
    Pending,
    Approved,
    Sent,
    Received,
    Completed,
    Cancelled,
}

impl PoStatus {
    /// The single source of truth for legal status transitions.
    pub fn allowed_transitions(self) -> &'static [PoStatus] {
        use PoStatus::*;
        match self {
            Draft => &[Pending, Approved, Cancelled],
            Pending => &[Approved, Cancelled],
            Approved => &[Sent, Cancelled],
            Sent => &[Received, Cancelled],
            Received => &[Completed],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition(self, to: PoStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Items may only be appended while the order is editable.
    pub fn accepts_items(self) -> bool {
        matches!(self, PoStatus::Draft | PoStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn draft_reaches_approved_directly_or_via_pending() {
        assert!(PoStatus::Draft.can_transition(PoStatus::Approved));
        assert!(PoStatus::Draft.can_transition(PoStatus::Pending));
        assert!(PoStatus::Pending.can_transition(PoStatus::Approved));
    }

    #[test]
    fn sent_requires_passing_through_approved() {
        assert!(!PoStatus::Draft.can_transition(PoStatus::Sent));
        assert!(!PoStatus::Pending.can_transition(PoStatus::Sent));
        assert!(PoStatus::Approved.can_transition(PoStatus::Sent));
    }

    #[test]
    fn completed_and_cancelled_are_terminal() {
        assert!(PoStatus::Completed.is_terminal());
        assert!(PoStatus::Cancelled.is_terminal());
        assert!(!PoStatus::Received.is_terminal());
    }

    #[test]
    fn statuses_round_trip_through_strings() {
        for status in [
            PoStatus::Draft,
            PoStatus::Pending,
            PoStatus::Approved,
            PoStatus::Sent,
            PoStatus::Received,
            PoStatus::Completed,
            PoStatus::Cancelled,
        ] {
            let parsed = PoStatus::from_str(&status.to_string()).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn items_only_append_while_editable() {
        assert!(PoStatus::Draft.accepts_items());
        assert!(PoStatus::Pending.accepts_items());
        assert!(!PoStatus::Approved.accepts_items());
        assert!(!PoStatus::Cancelled.accepts_items());
    }
}
