use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::RequestContext,
    db::DbPool,
    entities::inventory_lot,
    entities::inventory_transaction,
    entities::purchase_order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        PoStatus,
    },
    entities::purchase_order_item::{
        self, ActiveModel as ItemActiveModel, Entity as ItemEntity, Model as ItemModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    money::round_money,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub material_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Caller-supplied, validated against quantity x unit price.
    pub total_price: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreatePurchaseOrderRequest {
    pub supplier_id: Uuid,
    pub project_id: Option<Uuid>,
    pub order_date: Option<NaiveDate>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub items: Vec<NewOrderItem>,
    pub shipping_cost: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiveLine {
    pub order_item_id: Uuid,
    pub quantity: Decimal,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub condition: Option<String>,
    pub location_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ReceivePurchaseOrderRequest {
    #[validate(length(min = 1, message = "At least one received line is required"))]
    pub lines: Vec<ReceiveLine>,
}

/// Recomputes tax and grand total from a subtotal and the order's
/// ancillary amounts. Every total-recomputation path goes through here.
pub(crate) fn compute_totals(
    subtotal: Decimal,
    shipping_cost: Decimal,
    discount_amount: Decimal,
    tax_rate: Decimal,
) -> (Decimal, Decimal) {
    let tax_amount = round_money(subtotal * tax_rate);
    let total_amount = round_money(subtotal + tax_amount + shipping_cost - discount_amount);
    (tax_amount, total_amount)
}

/// Validates an item's caller-supplied arithmetic before it enters the ledger.
pub(crate) fn check_item(item: &NewOrderItem) -> Result<(), ServiceError> {
    if item.quantity <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "item quantity must be positive".to_string(),
        ));
    }
    if item.unit_price < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "item unit price must not be negative".to_string(),
        ));
    }
    let expected = round_money(item.quantity * item.unit_price);
    if round_money(item.total_price) != expected {
        return Err(ServiceError::ValidationError(format!(
            "item total {} does not match quantity x unit price ({})",
            item.total_price, expected
        )));
    }
    Ok(())
}

pub(crate) fn parse_po_status(raw: &str) -> Result<PoStatus, ServiceError> {
    PoStatus::from_str(raw)
        .map_err(|_| ServiceError::InternalError(format!("unknown order status '{}'", raw)))
}

/// Service owning the purchase order lifecycle.
#[derive(Clone)]
pub struct PurchaseOrderService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    tax_rate: Decimal,
}

impl PurchaseOrderService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, tax_rate: Decimal) -> Self {
        Self {
            db,
            event_sender,
            tax_rate,
        }
    }

    /// Creates a new purchase order in `draft` with a generated order number.
    #[instrument(skip(self, request), fields(supplier_id = %request.supplier_id))]
    pub async fn create_order(
        &self,
        request: CreatePurchaseOrderRequest,
    ) -> Result<OrderModel, ServiceError> {
        request.validate()?;
        for item in &request.items {
            check_item(item)?;
        }

        let now = Utc::now();
        let order_date = request.order_date.unwrap_or_else(|| now.date_naive());
        let order_id = Uuid::new_v4();
        let shipping_cost = round_money(request.shipping_cost.unwrap_or(Decimal::ZERO));
        let discount_amount = round_money(request.discount_amount.unwrap_or(Decimal::ZERO));

        let subtotal = round_money(request.items.iter().map(|i| i.total_price).sum());
        let (tax_amount, total_amount) =
            compute_totals(subtotal, shipping_cost, discount_amount, self.tax_rate);

        let txn = self.db.begin().await?;

        let existing: Vec<String> = OrderEntity::find()
            .filter(purchase_order::Column::OrderNumber.starts_with(&format!(
                "PO-{}-",
                order_date.year()
            )))
            .all(&txn)
            .await?
            .into_iter()
            .map(|o| o.order_number)
            .collect();
        let order_number = super::next_document_number("PO", order_date.year(), &existing);

        let order = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            supplier_id: Set(request.supplier_id),
            project_id: Set(request.project_id),
            status: Set(PoStatus::Draft.to_string()),
            payment_status: Set(None),
            subtotal: Set(subtotal),
            tax_amount: Set(tax_amount),
            shipping_cost: Set(shipping_cost),
            discount_amount: Set(discount_amount),
            total_amount: Set(total_amount),
            order_date: Set(order_date),
            expected_delivery_date: Set(request.expected_delivery_date),
            approved_by: Set(None),
            approved_at: Set(None),
            sent_at: Set(None),
            cancelled_at: Set(None),
            notes: Set(request.notes),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };
        let order = order.insert(&txn).await?;

        for item in &request.items {
            let model = ItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                material_id: Set(item.material_id),
                quantity: Set(round_money(item.quantity)),
                unit_price: Set(round_money(item.unit_price)),
                total_price: Set(round_money(item.total_price)),
                notes: Set(item.notes.clone()),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            };
            model.insert(&txn).await?;
        }

        txn.commit().await?;

        info!(order_id = %order_id, order_number = %order_number, "purchase order created");
        self.event_sender
            .emit(Event::PurchaseOrderCreated(order_id))
            .await;

        Ok(order)
    }

    /// Appends an item to an order, recomputing the order totals in the same
    /// transaction so two concurrent additions cannot lose an update.
    #[instrument(skip(self, item), fields(order_id = %order_id))]
    pub async fn add_item(
        &self,
        order_id: Uuid,
        item: NewOrderItem,
    ) -> Result<(OrderModel, ItemModel), ServiceError> {
        check_item(&item)?;

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", order_id)))?;

        let status = parse_po_status(&order.status)?;
        if !status.accepts_items() {
            return Err(ServiceError::ValidationError(format!(
                "items may only be added while the order is draft or pending (status is '{}')",
                status
            )));
        }

        let inserted = ItemActiveModel {
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

        let items = ItemEntity::find()
            .filter(purchase_order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        let subtotal = round_money(items.iter().map(|i| i.total_price).sum());
        let (tax_amount, total_amount) = compute_totals(
            subtotal,
            order.shipping_cost,
            order.discount_amount,
            self.tax_rate,
        );

        let version = order.version;
        let mut active: OrderActiveModel = order.into();
        active.subtotal = Set(subtotal);
        active.tax_amount = Set(tax_amount);
        active.total_amount = Set(total_amount);
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        let order = active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, item_id = %inserted.id, total = %order.total_amount, "order item added");
        self.event_sender
            .emit(Event::PurchaseOrderItemAdded {
                order_id,
                item_id: inserted.id,
                new_total: order.total_amount,
            })
            .await;

        Ok((order, inserted))
    }

    /// Moves the order to `new_status` if the transition table allows it.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn transition_status(
        &self,
        order_id: Uuid,
        new_status: PoStatus,
        note: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", order_id)))?;

        let current = parse_po_status(&order.status)?;
        if !current.can_transition(new_status) {
            error!(order_id = %order_id, from = %current, to = %new_status, "illegal status transition");
            return Err(ServiceError::InvalidTransition {
                from: current.to_string(),
                to: new_status.to_string(),
            });
        }

        let annotated = append_note(order.notes.clone(), &current, &new_status, note.as_deref());
        let version = order.version;
        let mut active: OrderActiveModel = order.into();
        active.status = Set(new_status.to_string());
        active.notes = Set(Some(annotated));
        match new_status {
            PoStatus::Sent => active.sent_at = Set(Some(now)),
            PoStatus::Cancelled => active.cancelled_at = Set(Some(now)),
            _ => {}
        }
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        let order = active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, from = %current, to = %new_status, "order status updated");
        self.event_sender
            .emit(Event::PurchaseOrderStatusChanged {
                order_id,
                old_status: current.to_string(),
                new_status: new_status.to_string(),
            })
            .await;
        if new_status == PoStatus::Cancelled {
            self.event_sender
                .emit(Event::PurchaseOrderCancelled(order_id))
                .await;
        }

        Ok(order)
    }

    /// Approves a draft order, stamping the approver and approval time.
    #[instrument(skip(self, ctx), fields(order_id = %order_id, approver = %ctx.user_id))]
    pub async fn approve(
        &self,
        order_id: Uuid,
        ctx: &RequestContext,
        note: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", order_id)))?;

        let current = parse_po_status(&order.status)?;
        if current != PoStatus::Draft {
            return Err(ServiceError::InvalidTransition {
                from: current.to_string(),
                to: PoStatus::Approved.to_string(),
            });
        }

        let annotated = append_note(
            order.notes.clone(),
            &current,
            &PoStatus::Approved,
            note.as_deref(),
        );
        let version = order.version;
        let mut active: OrderActiveModel = order.into();
        active.status = Set(PoStatus::Approved.to_string());
        active.approved_by = Set(Some(ctx.user_id));
        active.approved_at = Set(Some(now));
        active.notes = Set(Some(annotated));
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        let order = active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, "purchase order approved");
        self.event_sender
            .emit(Event::PurchaseOrderApproved(order_id))
            .await;

        Ok(order)
    }

    /// Receives goods against an approved (or sent) order.
    ///
    /// Each received line creates an inventory lot at the line's unit price
    /// and a ledger transaction; unreceived lines are simply left alone, so
    /// partial receipts are fine. The order ends in `received` either way.
    #[instrument(skip(self, request, ctx), fields(order_id = %order_id))]
    pub async fn receive(
        &self,
        order_id: Uuid,
        request: ReceivePurchaseOrderRequest,
        ctx: &RequestContext,
    ) -> Result<OrderModel, ServiceError> {
        request.validate()?;

        let now = Utc::now();
        let today = now.date_naive();
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", order_id)))?;

        let current = parse_po_status(&order.status)?;
        if !matches!(current, PoStatus::Approved | PoStatus::Sent) {
            return Err(ServiceError::InvalidTransition {
                from: current.to_string(),
                to: PoStatus::Received.to_string(),
            });
        }

        let items = ItemEntity::find()
            .filter(purchase_order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        let mut lots_created = 0usize;
        for (index, line) in request.lines.iter().enumerate() {
            let item = items
                .iter()
                .find(|i| i.id == line.order_item_id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Order item {} not found on order {}",
                        line.order_item_id, order_id
                    ))
                })?;

            if line.quantity <= Decimal::ZERO || line.quantity > item.quantity {
                return Err(ServiceError::ValidationError(format!(
                    "received quantity {} is out of range for item {} (ordered {})",
                    line.quantity, item.id, item.quantity
                )));
            }

            let lot_id = Uuid::new_v4();
            let lot_number = line
                .batch_number
                .clone()
                .unwrap_or_else(|| format!("{}-L{}", order.order_number, index + 1));

            inventory_lot::ActiveModel {
                id: Set(lot_id),
                material_id: Set(item.material_id),
                order_id: Set(order_id),
                order_item_id: Set(item.id),
                lot_number: Set(lot_number),
                quantity: Set(round_money(line.quantity)),
                unit_cost: Set(item.unit_price),
                batch_number: Set(line.batch_number.clone()),
                expiry_date: Set(line.expiry_date),
                condition: Set(line.condition.clone()),
                location_id: Set(line.location_id),
                received_date: Set(today),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;

            inventory_transaction::ActiveModel {
                id: Set(Uuid::new_v4()),
                material_id: Set(item.material_id),
                lot_id: Set(Some(lot_id)),
                transaction_type: Set("receive".to_string()),
                quantity: Set(round_money(line.quantity)),
                unit_cost: Set(item.unit_price),
                reference_id: Set(order_id),
                reference_type: Set("purchase_order".to_string()),
                performed_by: Set(Some(ctx.user_id)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;

            lots_created += 1;
        }

        let annotated = append_note(order.notes.clone(), &current, &PoStatus::Received, None);
        let version = order.version;
        let mut active: OrderActiveModel = order.into();
        active.status = Set(PoStatus::Received.to_string());
        active.notes = Set(Some(annotated));
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        let order = active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, lots_created, "purchase order received");
        self.event_sender
            .emit(Event::PurchaseOrderReceived {
                order_id,
                lots_created,
            })
            .await;

        Ok(order)
    }

    /// Cancels an order, annotating the reason in its audit trail.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        self.transition_status(order_id, PoStatus::Cancelled, reason)
            .await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        let order = OrderEntity::find_by_id(order_id).one(&*self.db).await?;
        if order.is_none() {
            warn!(order_id = %order_id, "purchase order not found");
        }
        Ok(order)
    }

    pub async fn get_order_items(&self, order_id: Uuid) -> Result<Vec<ItemModel>, ServiceError> {
        let items = ItemEntity::find()
            .filter(purchase_order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    pub async fn list_orders_by_supplier(
        &self,
        supplier_id: Uuid,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(purchase_order::Column::SupplierId.eq(supplier_id))
            .all(&*self.db)
            .await?;
        Ok(orders)
    }

    pub async fn list_orders_by_status(
        &self,
        status: PoStatus,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(purchase_order::Column::Status.eq(status.to_string()))
            .all(&*self.db)
            .await?;
        Ok(orders)
    }
}

/// Appends a status-change annotation to the order's audit trail.
fn append_note(
    existing: Option<String>,
    from: &PoStatus,
    to: &PoStatus,
    note: Option<&str>,
) -> String {
    let stamp = Utc::now().to_rfc3339();
    let line = match note {
        Some(n) => format!("[{}] {} -> {}: {}", stamp, from, to, n),
        None => format!("[{}] {} -> {}", stamp, from, to),
    };
    match existing {
        Some(prev) if !prev.is_empty() => format!("{}\n{}", prev, line),
        _ => line,
    }
}
