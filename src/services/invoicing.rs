use chrono::{Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::invoice::{
        self, ActiveModel as InvoiceActiveModel, BillType, CompanyBillStatus,
        Entity as InvoiceEntity, Model as InvoiceModel,
    },
    entities::purchase_order::{self, Entity as OrderEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    money::{round_money, PaymentStatus},
};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateCompanyBillRequest {
    pub purchase_order_id: Uuid,
    /// Caller-supplied; normalized to carry the `CB-` prefix.
    #[validate(length(min = 1, message = "Invoice number is required"))]
    pub invoice_number: String,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub payment_terms_days: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct CreateVendorBillRequest {
    pub supplier_id: Uuid,
    pub invoice_date: Option<NaiveDate>,
    /// Defaults to the sum of the covered sources when absent.
    pub invoice_amount: Option<Decimal>,
    pub covers_company_bills: Option<Vec<Uuid>>,
    pub covers_purchase_orders: Option<Vec<Uuid>>,
    pub due_date: Option<NaiveDate>,
    pub payment_terms_days: Option<i32>,
    pub notes: Option<String>,
}

/// Strips a stray `VB-` prefix and guarantees a `CB-` one.
fn normalize_company_number(raw: &str) -> String {
    let stripped = raw.strip_prefix("VB-").unwrap_or(raw);
    if stripped.starts_with("CB-") {
        stripped.to_string()
    } else {
        format!("CB-{}", stripped)
    }
}

fn due_date_from_terms(
    due_date: Option<NaiveDate>,
    invoice_date: NaiveDate,
    payment_terms_days: Option<i32>,
) -> Option<NaiveDate> {
    due_date.or_else(|| {
        payment_terms_days.map(|days| invoice_date + Duration::days(i64::from(days)))
    })
}

/// Service owning the company/vendor bill ledger.
#[derive(Clone)]
pub struct InvoicingService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl InvoicingService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates a company bill mirroring a single purchase order.
    #[instrument(skip(self, request), fields(purchase_order_id = %request.purchase_order_id))]
    pub async fn create_company_bill(
        &self,
        request: CreateCompanyBillRequest,
    ) -> Result<InvoiceModel, ServiceError> {
        request.validate()?;

        let now = Utc::now();
        let invoice_date = request.invoice_date.unwrap_or_else(|| now.date_naive());
        let invoice_number = normalize_company_number(request.invoice_number.trim());

        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(request.purchase_order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Purchase order {} not found",
                    request.purchase_order_id
                ))
            })?;

        let already_mirrored = InvoiceEntity::find()
            .filter(invoice::Column::BillType.eq(BillType::Company.to_string()))
            .filter(invoice::Column::PurchaseOrderId.eq(request.purchase_order_id))
            .count(&txn)
            .await?;
        if already_mirrored > 0 {
            return Err(ServiceError::AlreadyLinked {
                references: vec![request.purchase_order_id],
            });
        }

        let number_taken = InvoiceEntity::find()
            .filter(invoice::Column::InvoiceNumber.eq(invoice_number.clone()))
            .count(&txn)
            .await?;
        if number_taken > 0 {
            return Err(ServiceError::ValidationError(format!(
                "invoice number '{}' already exists",
                invoice_number
            )));
        }

        let amount = order.total_amount;
        let bill = InvoiceActiveModel {
            id: Set(Uuid::new_v4()),
            invoice_number: Set(invoice_number),
            bill_type: Set(BillType::Company.to_string()),
            supplier_id: Set(order.supplier_id),
            branch_id: Set(None),
            project_id: Set(order.project_id),
            purchase_order_id: Set(Some(order.id)),
            covers_company_bills: Set(None),
            covers_purchase_orders: Set(None),
            invoice_date: Set(invoice_date),
            due_date: Set(due_date_from_terms(
                request.due_date,
                invoice_date,
                request.payment_terms_days,
            )),
            payment_terms_days: Set(request.payment_terms_days),
            invoice_amount: Set(amount),
            paid_amount: Set(Decimal::ZERO),
            balance_due: Set(amount),
            bill_status: Set(Some(CompanyBillStatus::Draft.to_string())),
            payment_status: Set(None),
            notes: Set(request.notes),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(invoice_id = %bill.id, invoice_number = %bill.invoice_number, "company bill created");
        self.event_sender.emit(Event::CompanyBillCreated(bill.id)).await;

        Ok(bill)
    }

    /// Creates a vendor bill covering company bills or (legacy) purchase
    /// orders, with a server-generated `VB-<year>-<seq>` number.
    #[instrument(skip(self, request), fields(supplier_id = %request.supplier_id))]
    pub async fn create_vendor_bill(
        &self,
        request: CreateVendorBillRequest,
    ) -> Result<InvoiceModel, ServiceError> {
        request.validate()?;

        let company_refs = request.covers_company_bills.clone().unwrap_or_default();
        let order_refs = request.covers_purchase_orders.clone().unwrap_or_default();
        match (company_refs.is_empty(), order_refs.is_empty()) {
            (true, true) => {
                return Err(ServiceError::ValidationError(
                    "exactly one of covers_company_bills or covers_purchase_orders must be a \
                     non-empty list"
                        .to_string(),
                ))
            }
            (false, false) => {
                return Err(ServiceError::ValidationError(
                    "covers_company_bills and covers_purchase_orders are mutually exclusive"
                        .to_string(),
                ))
            }
            _ => {}
        }

        let now = Utc::now();
        let invoice_date = request.invoice_date.unwrap_or_else(|| now.date_naive());
        let txn = self.db.begin().await?;

        // Resolve the covered sources, checking supplier consistency.
        let mut source_total = Decimal::ZERO;
        let mut project_id = None;
        let mut branch_id = None;

        if !company_refs.is_empty() {
            for (index, id) in company_refs.iter().enumerate() {
                let covered = InvoiceEntity::find_by_id(*id)
                    .lock_exclusive()
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Company bill {} not found", id))
                    })?;
                if !covered.is_company_bill() {
                    return Err(ServiceError::WrongBillType(format!(
                        "invoice {} is not a company bill",
                        id
                    )));
                }
                if covered.supplier_id != request.supplier_id {
                    return Err(ServiceError::ValidationError(format!(
                        "company bill {} belongs to a different supplier",
                        id
                    )));
                }
                if index == 0 {
                    project_id = covered.project_id;
                    branch_id = covered.branch_id;
                }
                source_total += covered.invoice_amount;
            }
        } else {
            for (index, id) in order_refs.iter().enumerate() {
                let order = OrderEntity::find_by_id(*id)
                    .lock_exclusive()
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Purchase order {} not found", id))
                    })?;
                if order.supplier_id != request.supplier_id {
                    return Err(ServiceError::ValidationError(format!(
                        "purchase order {} belongs to a different supplier",
                        id
                    )));
                }
                if index == 0 {
                    project_id = order.project_id;
                }
                source_total += order.total_amount;
            }
        }

        // Exclusivity: no reference may already be claimed by any vendor
        // bill, across both coverage fields combined.
        let vendor_bills = InvoiceEntity::find()
            .filter(invoice::Column::BillType.eq(BillType::Vendor.to_string()))
            .all(&txn)
            .await?;
        let mut claimed: Vec<Uuid> = Vec::new();
        for bill in &vendor_bills {
            claimed.extend(InvoiceModel::coverage_ids(&bill.covers_company_bills));
            claimed.extend(InvoiceModel::coverage_ids(&bill.covers_purchase_orders));
        }
        let conflicts: Vec<Uuid> = company_refs
            .iter()
            .chain(order_refs.iter())
            .filter(|id| claimed.contains(id))
            .copied()
            .collect();
        if !conflicts.is_empty() {
            return Err(ServiceError::AlreadyLinked {
                references: conflicts,
            });
        }

        let invoice_amount = round_money(request.invoice_amount.unwrap_or(source_total));
        if invoice_amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "invoice amount must be positive".to_string(),
            ));
        }

        let year = invoice_date.year();
        let existing: Vec<String> = InvoiceEntity::find()
            .filter(invoice::Column::InvoiceNumber.starts_with(&format!("VB-{}-", year)))
            .all(&txn)
            .await?
            .into_iter()
            .map(|i| i.invoice_number)
            .collect();
        let invoice_number = super::next_document_number("VB", year, &existing);

        let covers_company = if company_refs.is_empty() {
            None
        } else {
            Some(serde_json::json!(company_refs))
        };
        let covers_orders = if order_refs.is_empty() {
            None
        } else {
            Some(serde_json::json!(order_refs))
        };

        let bill = InvoiceActiveModel {
            id: Set(Uuid::new_v4()),
            invoice_number: Set(invoice_number),
            bill_type: Set(BillType::Vendor.to_string()),
            supplier_id: Set(request.supplier_id),
            branch_id: Set(branch_id),
            project_id: Set(project_id),
            purchase_order_id: Set(None),
            covers_company_bills: Set(covers_company),
            covers_purchase_orders: Set(covers_orders),
            invoice_date: Set(invoice_date),
            due_date: Set(due_date_from_terms(
                request.due_date,
                invoice_date,
                request.payment_terms_days,
            )),
            payment_terms_days: Set(request.payment_terms_days),
            invoice_amount: Set(invoice_amount),
            paid_amount: Set(Decimal::ZERO),
            balance_due: Set(invoice_amount),
            bill_status: Set(None),
            payment_status: Set(Some(PaymentStatus::Unpaid.to_string())),
            notes: Set(request.notes),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(invoice_id = %bill.id, invoice_number = %bill.invoice_number, "vendor bill created");
        self.event_sender.emit(Event::VendorBillCreated(bill.id)).await;

        Ok(bill)
    }

    /// Updates a company bill's status (`draft` <-> `sent`).
    /// Vendor bills track `payment_status` instead and reject this call.
    #[instrument(skip(self), fields(invoice_id = %invoice_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        invoice_id: Uuid,
        new_status: CompanyBillStatus,
    ) -> Result<InvoiceModel, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let bill = InvoiceEntity::find_by_id(invoice_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", invoice_id)))?;

        if bill.is_vendor_bill() {
            return Err(ServiceError::WrongBillType(
                "vendor bills track payment status, not bill status".to_string(),
            ));
        }

        let old_status = bill
            .bill_status
            .clone()
            .unwrap_or_else(|| CompanyBillStatus::Draft.to_string());

        let version = bill.version;
        let mut active: InvoiceActiveModel = bill.into();
        active.bill_status = Set(Some(new_status.to_string()));
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        let bill = active.update(&txn).await?;

        txn.commit().await?;

        info!(invoice_id = %invoice_id, old_status = %old_status, new_status = %new_status, "company bill status updated");
        self.event_sender
            .emit(Event::InvoiceStatusChanged {
                invoice_id,
                old_status,
                new_status: new_status.to_string(),
            })
            .await;

        Ok(bill)
    }

    /// Deletes an invoice. Refused once any payment has been recorded.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let bill = InvoiceEntity::find_by_id(invoice_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", invoice_id)))?;

        if bill.paid_amount > Decimal::ZERO {
            return Err(ServiceError::HasPayments(invoice_id));
        }

        bill.delete(&txn).await?;
        txn.commit().await?;

        info!(invoice_id = %invoice_id, "invoice deleted");
        self.event_sender.emit(Event::InvoiceDeleted(invoice_id)).await;

        Ok(())
    }

    pub async fn get_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceModel>, ServiceError> {
        let bill = InvoiceEntity::find_by_id(invoice_id).one(&*self.db).await?;
        Ok(bill)
    }

    pub async fn list_invoices_by_supplier(
        &self,
        supplier_id: Uuid,
        bill_type: Option<BillType>,
    ) -> Result<Vec<InvoiceModel>, ServiceError> {
        let mut query =
            InvoiceEntity::find().filter(invoice::Column::SupplierId.eq(supplier_id));
        if let Some(kind) = bill_type {
            query = query.filter(invoice::Column::BillType.eq(kind.to_string()));
        }
        let bills = query.all(&*self.db).await?;
        Ok(bills)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_numbers_are_forced_to_the_cb_prefix() {
        assert_eq!(normalize_company_number("CB-2025-00001"), "CB-2025-00001");
        assert_eq!(normalize_company_number("2025-00001"), "CB-2025-00001");
        assert_eq!(normalize_company_number("VB-2025-00001"), "CB-2025-00001");
    }

    #[test]
    fn due_dates_derive_from_payment_terms_when_absent() {
        let invoice_date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let explicit = NaiveDate::from_ymd_opt(2025, 4, 15).unwrap();

        assert_eq!(
            due_date_from_terms(Some(explicit), invoice_date, Some(30)),
            Some(explicit)
        );
        assert_eq!(
            due_date_from_terms(None, invoice_date, Some(30)),
            NaiveDate::from_ymd_opt(2025, 3, 31)
        );
        assert_eq!(due_date_from_terms(None, invoice_date, None), None);
    }
}
