use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{consts, RequestContext},
    db::DbPool,
    entities::purchase_order::{ActiveModel as OrderActiveModel, Entity as OrderEntity, PoStatus},
    entities::purchase_order_amendment::{
        self, ActiveModel as AmendmentActiveModel, AmendmentStatus, Entity as AmendmentEntity,
        Model as AmendmentModel,
    },
    entities::purchase_order_item::{
        self, ActiveModel as ItemActiveModel, Entity as ItemEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    money::round_money,
    services::purchase_orders::{check_item, compute_totals, parse_po_status, NewOrderItem},
};

/// Fully-populated proposed state of an order.
///
/// Every amendable field is present: values not overridden by the proposal
/// default to the order's current value, so an approved snapshot can be
/// copied onto the order wholesale (overwrite, never merge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedOrderFields {
    pub expected_delivery_date: Option<NaiveDate>,
    pub shipping_cost: Decimal,
    pub discount_amount: Decimal,
    pub notes: Option<String>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    /// When present, approval replaces the order's entire item set.
    pub items: Option<Vec<NewOrderItem>>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ProposeAmendmentRequest {
    #[validate(length(min = 1, message = "A reason is required"))]
    pub reason: String,
    pub expected_delivery_date: Option<NaiveDate>,
    pub shipping_cost: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
    pub notes: Option<String>,
    pub items: Option<Vec<NewOrderItem>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmendmentDecision {
    Approved,
    Rejected,
}

/// Service owning the amendment workflow against issued purchase orders.
#[derive(Clone)]
pub struct AmendmentService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    tax_rate: Decimal,
}

impl AmendmentService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, tax_rate: Decimal) -> Self {
        Self {
            db,
            event_sender,
            tax_rate,
        }
    }

    /// Proposes a change set against an issued order.
    ///
    /// The original order is not touched; the full proposed state is stored
    /// as a snapshot and applied only on approval.
    #[instrument(skip(self, request), fields(order_id = %order_id))]
    pub async fn propose(
        &self,
        order_id: Uuid,
        request: ProposeAmendmentRequest,
    ) -> Result<AmendmentModel, ServiceError> {
        request.validate()?;
        if let Some(items) = &request.items {
            if items.is_empty() {
                return Err(ServiceError::ValidationError(
                    "proposed item list must not be empty".to_string(),
                ));
            }
            for item in items {
                check_item(item)?;
            }
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", order_id)))?;

        match parse_po_status(&order.status)? {
            PoStatus::Draft => {
                return Err(ServiceError::NotAmendable {
                    order_id,
                    reason: "draft orders are edited directly".to_string(),
                })
            }
            PoStatus::Cancelled => {
                return Err(ServiceError::NotAmendable {
                    order_id,
                    reason: "order is cancelled".to_string(),
                })
            }
            _ => {}
        }

        let pending = AmendmentEntity::find()
            .filter(purchase_order_amendment::Column::OriginalOrderId.eq(order_id))
            .filter(
                purchase_order_amendment::Column::Status.eq(AmendmentStatus::Pending.to_string()),
            )
            .count(&txn)
            .await?;
        if pending > 0 {
            return Err(ServiceError::AmendmentPending(order_id));
        }

        // Snapshot: proposal values where given, order values otherwise.
        let shipping_cost =
            round_money(request.shipping_cost.unwrap_or(order.shipping_cost));
        let discount_amount =
            round_money(request.discount_amount.unwrap_or(order.discount_amount));
        let (subtotal, tax_amount) = match &request.items {
            Some(items) => {
                let subtotal = round_money(items.iter().map(|i| i.total_price).sum());
                let (tax, _) =
                    compute_totals(subtotal, shipping_cost, discount_amount, self.tax_rate);
                (subtotal, tax)
            }
            None => (order.subtotal, order.tax_amount),
        };
        let total_amount = round_money(subtotal + tax_amount + shipping_cost - discount_amount);

        let snapshot = ProposedOrderFields {
            expected_delivery_date: request
                .expected_delivery_date
                .or(order.expected_delivery_date),
            shipping_cost,
            discount_amount,
            notes: request.notes.clone().or_else(|| order.notes.clone()),
            subtotal,
            tax_amount,
            total_amount,
            items: request.items.clone(),
        };
        let changes_summary = serde_json::to_value(&snapshot)
            .map_err(|e| ServiceError::InternalError(format!("snapshot encoding failed: {}", e)))?;

        let next_number = AmendmentEntity::find()
            .filter(purchase_order_amendment::Column::OriginalOrderId.eq(order_id))
            .count(&txn)
            .await? as i32
            + 1;

        let amendment = AmendmentActiveModel {
            id: Set(Uuid::new_v4()),
            original_order_id: Set(order_id),
            amendment_number: Set(next_number),
            reason: Set(request.reason.clone()),
            changes_summary: Set(changes_summary),
            previous_total: Set(order.total_amount),
            new_total: Set(total_amount),
            status: Set(AmendmentStatus::Pending.to_string()),
            approved_by: Set(None),
            approved_at: Set(None),
            resolution_notes: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            amendment_id = %amendment.id,
            amendment_number = next_number,
            "amendment proposed"
        );
        self.event_sender
            .emit(Event::AmendmentProposed {
                order_id,
                amendment_id: amendment.id,
                amendment_number: next_number,
            })
            .await;

        Ok(amendment)
    }

    /// Resolves a pending amendment.
    ///
    /// Approval copies the stored snapshot onto the original order and, when
    /// the snapshot carries items, replaces the order's item set wholesale.
    /// Rejection changes nothing but the amendment's own fields.
    #[instrument(skip(self, ctx), fields(amendment_id = %amendment_id, decision = ?decision))]
    pub async fn resolve(
        &self,
        amendment_id: Uuid,
        decision: AmendmentDecision,
        notes: Option<String>,
        ctx: &RequestContext,
    ) -> Result<AmendmentModel, ServiceError> {
        ctx.require_permission(consts::APPROVE_AMENDMENTS)?;

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let amendment = AmendmentEntity::find_by_id(amendment_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Amendment {} not found", amendment_id))
            })?;

        let status = AmendmentStatus::from_str(&amendment.status).map_err(|_| {
            ServiceError::InternalError(format!("unknown amendment status '{}'", amendment.status))
        })?;
        if status != AmendmentStatus::Pending {
            return Err(ServiceError::AlreadyProcessed(format!(
                "amendment {} is already {}",
                amendment_id, status
            )));
        }

        if decision == AmendmentDecision::Approved {
            let order = OrderEntity::find_by_id(amendment.original_order_id)
                .lock_exclusive()
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Purchase order {} not found",
                        amendment.original_order_id
                    ))
                })?;

            let snapshot: ProposedOrderFields =
                serde_json::from_value(amendment.changes_summary.clone()).map_err(|e| {
                    ServiceError::InternalError(format!("snapshot decoding failed: {}", e))
                })?;

            let order_id = order.id;
            let version = order.version;
            let mut active: OrderActiveModel = order.into();
            active.expected_delivery_date = Set(snapshot.expected_delivery_date);
            active.shipping_cost = Set(snapshot.shipping_cost);
            active.discount_amount = Set(snapshot.discount_amount);
            active.notes = Set(snapshot.notes.clone());
            active.subtotal = Set(snapshot.subtotal);
            active.tax_amount = Set(snapshot.tax_amount);
            active.total_amount = Set(snapshot.total_amount);
            active.updated_at = Set(Some(now));
            active.version = Set(version + 1);
            active.update(&txn).await?;

            if let Some(items) = &snapshot.items {
                // Full replace, not a diff.
                ItemEntity::delete_many()
                    .filter(purchase_order_item::Column::OrderId.eq(order_id))
                    .exec(&txn)
                    .await?;
                for item in items {
                    ItemActiveModel {
                        id: Set(Uuid::new_v4()),
                        order_id: Set(order_id),
                        material_id: Set(item.material_id),
                        quantity: Set(round_money(item.quantity)),
                        unit_price: Set(round_money(item.unit_price)),
                        total_price: Set(round_money(item.total_price)),
                        notes: Set(item.notes.clone()),
                        created_at: Set(now),
                        updated_at: Set(Some(now)),
                    }
                    .insert(&txn)
                    .await?;
                }
            }
        }

        let new_status = match decision {
            AmendmentDecision::Approved => AmendmentStatus::Approved,
            AmendmentDecision::Rejected => AmendmentStatus::Rejected,
        };
        let mut active: AmendmentActiveModel = amendment.into();
        active.status = Set(new_status.to_string());
        active.approved_by = Set(Some(ctx.user_id));
        active.approved_at = Set(Some(now));
        active.resolution_notes = Set(notes);
        active.updated_at = Set(Some(now));
        let amendment = active.update(&txn).await?;

        txn.commit().await?;

        info!(amendment_id = %amendment_id, status = %new_status, "amendment resolved");
        self.event_sender
            .emit(Event::AmendmentResolved {
                amendment_id,
                approved: decision == AmendmentDecision::Approved,
            })
            .await;

        Ok(amendment)
    }

    pub async fn get_amendment(
        &self,
        amendment_id: Uuid,
    ) -> Result<Option<AmendmentModel>, ServiceError> {
        let amendment = AmendmentEntity::find_by_id(amendment_id).one(&*self.db).await?;
        Ok(amendment)
    }

    pub async fn list_amendments_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<AmendmentModel>, ServiceError> {
        let amendments = AmendmentEntity::find()
            .filter(purchase_order_amendment::Column::OriginalOrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok(amendments)
    }
}
