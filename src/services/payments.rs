use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{consts, RequestContext},
    db::DbPool,
    entities::bank_account::{self, Entity as BankAccountEntity},
    entities::bank_transaction,
    entities::invoice::{
        self, ActiveModel as InvoiceActiveModel, BillType, Entity as InvoiceEntity,
        Model as InvoiceModel,
    },
    entities::invoice_payment::{
        self, Entity as PaymentEntity, Model as PaymentModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    money::{apply_payment, derive_payment_status, PaymentStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Check,
    Card,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RecordPaymentRequest {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    /// With `bank_transfer`, a withdrawal is posted against this account in
    /// the same transaction as the invoice update.
    pub bank_account_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordPaymentResponse {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    /// Amount actually applied (capped to the balance when within tolerance).
    pub applied_amount: Decimal,
    pub paid_amount: Decimal,
    pub balance_due: Decimal,
    pub payment_status: PaymentStatus,
    pub capped: bool,
}

/// Service owning payment reconciliation against vendor bills.
///
/// Invoice-row update, payment-ledger insert, and the optional bank leg all
/// happen inside one transaction; a partial application is impossible.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    tolerance: Decimal,
}

impl PaymentService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, tolerance: Decimal) -> Self {
        Self {
            db,
            event_sender,
            tolerance,
        }
    }

    /// Applies a payment to a vendor bill.
    #[instrument(skip(self, request, ctx), fields(invoice_id = %request.invoice_id, amount = %request.amount))]
    pub async fn record_payment(
        &self,
        request: RecordPaymentRequest,
        ctx: &RequestContext,
    ) -> Result<RecordPaymentResponse, ServiceError> {
        request.validate()?;
        ctx.require_permission(consts::RECORD_PAYMENTS)?;

        let now = Utc::now();
        let today = now.date_naive();
        let txn = self.db.begin().await?;

        let bill = InvoiceEntity::find_by_id(request.invoice_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Invoice {} not found", request.invoice_id))
            })?;

        if bill.is_company_bill() {
            let advice = match self.find_covering_vendor_bill(&txn, bill.id).await? {
                Some(vendor) => format!(
                    "pay the covering vendor bill {} ({}) instead",
                    vendor.invoice_number, vendor.id
                ),
                None => "create a vendor bill covering it first".to_string(),
            };
            return Err(ServiceError::CompanyBillNotPayable {
                invoice_id: bill.id,
                advice,
            });
        }

        let application = apply_payment(
            bill.invoice_amount,
            bill.paid_amount,
            request.amount,
            self.tolerance,
        )?;
        let new_status = derive_payment_status(
            bill.invoice_amount,
            application.new_paid_amount,
            bill.due_date,
            today,
            self.tolerance,
        );

        let payment_id = Uuid::new_v4();
        invoice_payment::ActiveModel {
            id: Set(payment_id),
            invoice_id: Set(bill.id),
            amount: Set(application.applied),
            method: Set(request.method.to_string()),
            reference: Set(request.reference.clone()),
            bank_account_id: Set(request.bank_account_id),
            notes: Set(request.notes.clone()),
            recorded_by: Set(ctx.user_id),
            recorded_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let invoice_id = bill.id;
        let version = bill.version;
        let mut active: InvoiceActiveModel = bill.into();
        active.paid_amount = Set(application.new_paid_amount);
        active.balance_due = Set(application.new_balance_due);
        active.payment_status = Set(Some(new_status.to_string()));
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        active.update(&txn).await?;

        let mut bank_leg = None;
        if request.method == PaymentMethod::BankTransfer {
            if let Some(account_id) = request.bank_account_id {
                let account = BankAccountEntity::find_by_id(account_id)
                    .lock_exclusive()
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Bank account {} not found", account_id))
                    })?;

                bank_transaction::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    bank_account_id: Set(account_id),
                    transaction_type: Set("withdrawal".to_string()),
                    amount: Set(application.applied),
                    invoice_id: Set(Some(invoice_id)),
                    payment_id: Set(Some(payment_id)),
                    description: Set(request.reference.clone()),
                    created_at: Set(now),
                }
                .insert(&txn)
                .await?;

                let balance = account.balance;
                let account_version = account.version;
                let mut account_active: bank_account::ActiveModel = account.into();
                account_active.balance = Set(balance - application.applied);
                account_active.updated_at = Set(Some(now));
                account_active.version = Set(account_version + 1);
                account_active.update(&txn).await?;

                bank_leg = Some(account_id);
            }
        }

        txn.commit().await?;

        info!(
            invoice_id = %invoice_id,
            payment_id = %payment_id,
            applied = %application.applied,
            status = %new_status,
            "payment recorded"
        );
        self.event_sender
            .emit(Event::PaymentRecorded {
                invoice_id,
                payment_id,
                amount: application.applied,
                payment_status: new_status.to_string(),
            })
            .await;
        if let Some(account_id) = bank_leg {
            self.event_sender
                .emit(Event::BankWithdrawalPosted {
                    bank_account_id: account_id,
                    amount: application.applied,
                })
                .await;
        }

        Ok(RecordPaymentResponse {
            payment_id,
            invoice_id,
            applied_amount: application.applied,
            paid_amount: application.new_paid_amount,
            balance_due: application.new_balance_due,
            payment_status: new_status,
            capped: application.capped,
        })
    }

    pub async fn list_payments_for_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<PaymentModel>, ServiceError> {
        let payments = PaymentEntity::find()
            .filter(invoice_payment::Column::InvoiceId.eq(invoice_id))
            .all(&*self.db)
            .await?;
        Ok(payments)
    }

    /// Finds the vendor bill whose coverage set claims `company_bill_id`.
    async fn find_covering_vendor_bill(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        company_bill_id: Uuid,
    ) -> Result<Option<InvoiceModel>, ServiceError> {
        let vendor_bills = InvoiceEntity::find()
            .filter(invoice::Column::BillType.eq(BillType::Vendor.to_string()))
            .all(txn)
            .await?;
        Ok(vendor_bills.into_iter().find(|bill| {
            InvoiceModel::coverage_ids(&bill.covers_company_bills).contains(&company_bill_id)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn payment_methods_serialize_in_snake_case() {
        assert_eq!(PaymentMethod::BankTransfer.to_string(), "bank_transfer");
        assert_eq!(
            PaymentMethod::from_str("bank_transfer").unwrap(),
            PaymentMethod::BankTransfer
        );
        assert_eq!(PaymentMethod::Cash.to_string(), "cash");
    }
}
