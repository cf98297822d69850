use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{consts, RequestContext},
    db::DbPool,
    entities::petty_cash_card::{
        self, ActiveModel as CardActiveModel, CardStatus, Entity as CardEntity, Model as CardModel,
    },
    entities::petty_cash_expense::{
        self, ActiveModel as ExpenseActiveModel, Entity as ExpenseEntity, ExpenseStatus,
        Model as ExpenseModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    money::round_money,
};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateCardRequest {
    #[validate(length(min = 1, message = "Card number is required"))]
    pub card_number: String,
    pub assigned_user_id: Uuid,
    pub initial_balance: Option<Decimal>,
    pub monthly_limit: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AdjustDirection {
    Deduct,
    Credit,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct SubmitExpenseRequest {
    pub card_id: Uuid,
    pub amount: Decimal,
    pub description: Option<String>,
    pub expense_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseDecision {
    Approved,
    Rejected,
}

/// The half-open [start, end) window of the month containing `today`.
fn month_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today.with_day(1).unwrap_or(today);
    let end = if today.month() == 12 {
        NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)
    }
    .unwrap_or(start);
    (start, end)
}

/// Service owning petty-cash cards and their expense ledger.
#[derive(Clone)]
pub struct PettyCashService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl PettyCashService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Issues a card. A user may hold at most one active card at a time.
    #[instrument(skip(self, request), fields(assigned_user_id = %request.assigned_user_id))]
    pub async fn create_card(&self, request: CreateCardRequest) -> Result<CardModel, ServiceError> {
        request.validate()?;
        let initial_balance = round_money(request.initial_balance.unwrap_or(Decimal::ZERO));
        if initial_balance < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "initial balance must not be negative".to_string(),
            ));
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let active_cards = CardEntity::find()
            .filter(petty_cash_card::Column::AssignedUserId.eq(request.assigned_user_id))
            .filter(petty_cash_card::Column::Status.eq(CardStatus::Active.to_string()))
            .count(&txn)
            .await?;
        if active_cards > 0 {
            return Err(ServiceError::DuplicateActiveCard(request.assigned_user_id));
        }

        let card = CardActiveModel {
            id: Set(Uuid::new_v4()),
            card_number: Set(request.card_number.clone()),
            assigned_user_id: Set(request.assigned_user_id),
            current_balance: Set(initial_balance),
            total_spent: Set(Decimal::ZERO),
            monthly_limit: Set(request.monthly_limit.map(round_money)),
            status: Set(CardStatus::Active.to_string()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(card_id = %card.id, "petty-cash card created");
        self.event_sender.emit(Event::PettyCashCardCreated(card.id)).await;

        Ok(card)
    }

    /// Manually adjusts a card balance. Deductions compare exactly against
    /// the current balance; no tolerance applies to manual adjustments.
    #[instrument(skip(self), fields(card_id = %card_id, amount = %amount, direction = %direction))]
    pub async fn adjust_balance(
        &self,
        card_id: Uuid,
        amount: Decimal,
        direction: AdjustDirection,
    ) -> Result<CardModel, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "adjustment amount must be positive".to_string(),
            ));
        }
        let amount = round_money(amount);

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let card = CardEntity::find_by_id(card_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Petty-cash card {} not found", card_id)))?;

        let new_balance = match direction {
            AdjustDirection::Deduct => {
                if amount > card.current_balance {
                    return Err(ServiceError::InsufficientBalance {
                        requested: amount,
                        available: card.current_balance,
                    });
                }
                card.current_balance - amount
            }
            AdjustDirection::Credit => card.current_balance + amount,
        };

        let version = card.version;
        let mut active: CardActiveModel = card.into();
        active.current_balance = Set(round_money(new_balance));
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        let card = active.update(&txn).await?;

        txn.commit().await?;

        info!(card_id = %card_id, balance = %card.current_balance, "card balance adjusted");
        self.event_sender
            .emit(Event::PettyCashBalanceAdjusted {
                card_id,
                amount,
                direction: direction.to_string(),
            })
            .await;

        Ok(card)
    }

    /// Submits an expense for approval.
    ///
    /// Only the card assignee or an expense manager may submit. The
    /// monthly-limit check counts approved expenses only; pending ones never
    /// block a submission.
    #[instrument(skip(self, request, ctx), fields(card_id = %request.card_id, amount = %request.amount))]
    pub async fn submit_expense(
        &self,
        request: SubmitExpenseRequest,
        ctx: &RequestContext,
    ) -> Result<ExpenseModel, ServiceError> {
        request.validate()?;
        if request.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "expense amount must be positive".to_string(),
            ));
        }
        let amount = round_money(request.amount);

        let now = Utc::now();
        let expense_date = request.expense_date.unwrap_or_else(|| now.date_naive());
        let txn = self.db.begin().await?;

        let card = CardEntity::find_by_id(request.card_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Petty-cash card {} not found", request.card_id))
            })?;

        if card.status != CardStatus::Active.to_string() {
            return Err(ServiceError::ValidationError(format!(
                "card {} is not active (status is '{}')",
                card.id, card.status
            )));
        }

        if ctx.user_id != card.assigned_user_id && !ctx.has_permission(consts::MANAGE_EXPENSES) {
            return Err(ServiceError::UnauthorizedActor(format!(
                "user {} is neither the card assignee nor an expense manager",
                ctx.user_id
            )));
        }

        if amount > card.current_balance {
            return Err(ServiceError::InsufficientBalance {
                requested: amount,
                available: card.current_balance,
            });
        }

        if let Some(limit) = card.monthly_limit {
            let (start, end) = month_window(expense_date);
            let approved: Vec<ExpenseModel> = ExpenseEntity::find()
                .filter(petty_cash_expense::Column::CardId.eq(card.id))
                .filter(
                    petty_cash_expense::Column::Status.eq(ExpenseStatus::Approved.to_string()),
                )
                .filter(petty_cash_expense::Column::ExpenseDate.gte(start))
                .filter(petty_cash_expense::Column::ExpenseDate.lt(end))
                .all(&txn)
                .await?;
            let approved_spend: Decimal = approved.iter().map(|e| e.amount).sum();
            let would_be = round_money(approved_spend + amount);
            if would_be > limit {
                return Err(ServiceError::MonthlyLimitExceeded { limit, would_be });
            }
        }

        let expense = ExpenseActiveModel {
            id: Set(Uuid::new_v4()),
            card_id: Set(card.id),
            submitted_by: Set(ctx.user_id),
            amount: Set(amount),
            description: Set(request.description.clone()),
            expense_date: Set(expense_date),
            status: Set(ExpenseStatus::Pending.to_string()),
            resolved_by: Set(None),
            resolved_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(card_id = %card.id, expense_id = %expense.id, "expense submitted");
        self.event_sender
            .emit(Event::ExpenseSubmitted {
                card_id: card.id,
                expense_id: expense.id,
                amount,
            })
            .await;

        Ok(expense)
    }

    /// Resolves a pending expense. Approval debits the card in the same
    /// transaction; rejection leaves the balance untouched.
    #[instrument(skip(self, ctx), fields(expense_id = %expense_id, decision = ?decision))]
    pub async fn resolve_expense(
        &self,
        expense_id: Uuid,
        decision: ExpenseDecision,
        ctx: &RequestContext,
    ) -> Result<ExpenseModel, ServiceError> {
        ctx.require_permission(consts::MANAGE_EXPENSES)?;

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let expense = ExpenseEntity::find_by_id(expense_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Expense {} not found", expense_id)))?;

        let status = ExpenseStatus::from_str(&expense.status).map_err(|_| {
            ServiceError::InternalError(format!("unknown expense status '{}'", expense.status))
        })?;
        if status != ExpenseStatus::Pending {
            return Err(ServiceError::AlreadyProcessed(format!(
                "expense {} is already {}",
                expense_id, status
            )));
        }

        if decision == ExpenseDecision::Approved {
            let card = CardEntity::find_by_id(expense.card_id)
                .lock_exclusive()
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Petty-cash card {} not found", expense.card_id))
                })?;

            if expense.amount > card.current_balance {
                return Err(ServiceError::InsufficientBalance {
                    requested: expense.amount,
                    available: card.current_balance,
                });
            }

            let balance = card.current_balance;
            let spent = card.total_spent;
            let version = card.version;
            let mut card_active: CardActiveModel = card.into();
            card_active.current_balance = Set(round_money(balance - expense.amount));
            card_active.total_spent = Set(round_money(spent + expense.amount));
            card_active.updated_at = Set(Some(now));
            card_active.version = Set(version + 1);
            card_active.update(&txn).await?;
        }

        let new_status = match decision {
            ExpenseDecision::Approved => ExpenseStatus::Approved,
            ExpenseDecision::Rejected => ExpenseStatus::Rejected,
        };
        let mut active: ExpenseActiveModel = expense.into();
        active.status = Set(new_status.to_string());
        active.resolved_by = Set(Some(ctx.user_id));
        active.resolved_at = Set(Some(now));
        active.updated_at = Set(Some(now));
        let expense = active.update(&txn).await?;

        txn.commit().await?;

        info!(expense_id = %expense_id, status = %new_status, "expense resolved");
        self.event_sender
            .emit(Event::ExpenseResolved {
                expense_id,
                approved: decision == ExpenseDecision::Approved,
            })
            .await;

        Ok(expense)
    }

    pub async fn get_card(&self, card_id: Uuid) -> Result<Option<CardModel>, ServiceError> {
        let card = CardEntity::find_by_id(card_id).one(&*self.db).await?;
        Ok(card)
    }

    pub async fn list_expenses_for_card(
        &self,
        card_id: Uuid,
    ) -> Result<Vec<ExpenseModel>, ServiceError> {
        let expenses = ExpenseEntity::find()
            .filter(petty_cash_expense::Column::CardId.eq(card_id))
            .all(&*self.db)
            .await?;
        Ok(expenses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_window_is_half_open() {
        let mid_june = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let (start, end) = month_window(mid_june);
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
    }

    #[test]
    fn month_window_wraps_december_into_january() {
        let december = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        let (start, end) = month_window(december);
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }
}
