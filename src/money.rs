//! Decimal-safe money arithmetic shared by every ledger-touching component.
//!
//! All monetary values in this system are fixed-point decimals with a scale
//! of 3. Comparisons against stored balances go through the explicit
//! [`PAYMENT_EPSILON`] tolerance so that drift from storage round-trips never
//! turns a legitimate final payment into a rejection.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::errors::ServiceError;

/// Scale used for every monetary column.
pub const MONEY_SCALE: u32 = 3;

/// Tolerance for payment capping and zero detection. Overridable per tenant
/// via `AppConfig::payment_tolerance`.
pub const PAYMENT_EPSILON: Decimal = dec!(0.001);

/// Rounds a monetary value to the canonical 3-decimal scale.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp(MONEY_SCALE)
}

/// Treats any balance within `epsilon` of zero as exactly zero.
pub fn snap_to_zero(value: Decimal, epsilon: Decimal) -> Decimal {
    if value.abs() <= epsilon {
        Decimal::ZERO
    } else {
        value
    }
}

/// Payment state of a payable (vendor) invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
    Overdue,
}

/// Outcome of applying a payment to an invoice balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaymentApplication {
    /// Amount actually applied (requested amount, possibly capped).
    pub applied: Decimal,
    pub new_paid_amount: Decimal,
    pub new_balance_due: Decimal,
    /// True when the requested amount was capped to the remaining balance.
    pub capped: bool,
}

/// Applies `requested` against the invoice balance.
///
/// A request exceeding the remaining balance by no more than `epsilon` is
/// capped to the exact balance; an excess beyond `epsilon` fails with
/// `AMOUNT_EXCEEDS_BALANCE` and leaves nothing to write.
pub fn apply_payment(
    invoice_amount: Decimal,
    paid_amount: Decimal,
    requested: Decimal,
    epsilon: Decimal,
) -> Result<PaymentApplication, ServiceError> {
    if requested <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "payment amount must be positive".to_string(),
        ));
    }

    let balance = snap_to_zero(round_money(invoice_amount - paid_amount), epsilon);
    let requested = round_money(requested);

    if requested > balance + epsilon {
        return Err(ServiceError::AmountExceedsBalance {
            requested,
            balance,
        });
    }

    let applied = requested.min(balance);
    let new_paid_amount = round_money(paid_amount + applied);
    let new_balance_due = snap_to_zero(round_money(invoice_amount - new_paid_amount), epsilon);

    Ok(PaymentApplication {
        applied,
        new_paid_amount,
        new_balance_due,
        capped: requested > balance,
    })
}

/// Derives the payment status of a vendor bill from its ledger figures.
///
/// Rule order: paid when the balance is zero, unpaid when nothing has been
/// paid, overdue when a balance remains past the due date, otherwise partial.
pub fn derive_payment_status(
    invoice_amount: Decimal,
    paid_amount: Decimal,
    due_date: Option<NaiveDate>,
    today: NaiveDate,
    epsilon: Decimal,
) -> PaymentStatus {
    let balance = snap_to_zero(round_money(invoice_amount - paid_amount), epsilon);
    if balance == Decimal::ZERO {
        return PaymentStatus::Paid;
    }
    if snap_to_zero(round_money(paid_amount), epsilon) == Decimal::ZERO {
        return PaymentStatus::Unpaid;
    }
    if due_date.is_some_and(|due| due < today) {
        return PaymentStatus::Overdue;
    }
    PaymentStatus::Partial
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn rounding_is_scale_three() {
        assert_eq!(round_money(dec!(10.12345)), dec!(10.123));
        assert_eq!(round_money(dec!(0.0004)), dec!(0.000));
    }

    #[test]
    fn near_zero_balances_snap_to_exact_zero() {
        assert_eq!(snap_to_zero(dec!(0.0009), PAYMENT_EPSILON), Decimal::ZERO);
        assert_eq!(snap_to_zero(dec!(-0.001), PAYMENT_EPSILON), Decimal::ZERO);
        assert_eq!(snap_to_zero(dec!(0.002), PAYMENT_EPSILON), dec!(0.002));
    }

    #[test]
    fn payment_within_balance_applies_in_full() {
        let app = apply_payment(dec!(800), dec!(0), dec!(300), PAYMENT_EPSILON).unwrap();
        assert_eq!(app.applied, dec!(300));
        assert_eq!(app.new_paid_amount, dec!(300));
        assert_eq!(app.new_balance_due, dec!(500));
        assert!(!app.capped);
    }

    #[test]
    fn payment_within_epsilon_of_balance_is_capped_not_rejected() {
        let app = apply_payment(dec!(100), dec!(50), dec!(50.001), PAYMENT_EPSILON).unwrap();
        assert_eq!(app.applied, dec!(50));
        assert_eq!(app.new_paid_amount, dec!(100));
        assert_eq!(app.new_balance_due, Decimal::ZERO);
        assert!(app.capped);
    }

    #[test]
    fn payment_beyond_epsilon_fails() {
        let err = apply_payment(dec!(100), dec!(50), dec!(50.002), PAYMENT_EPSILON).unwrap_err();
        assert_matches!(err, ServiceError::AmountExceedsBalance { .. });
    }

    #[test]
    fn any_positive_payment_on_settled_invoice_fails() {
        let err = apply_payment(dec!(800), dec!(800), dec!(0.01), PAYMENT_EPSILON).unwrap_err();
        assert_matches!(err, ServiceError::AmountExceedsBalance { .. });
    }

    #[test]
    fn zero_or_negative_payments_are_rejected_before_the_ledger() {
        assert_matches!(
            apply_payment(dec!(100), dec!(0), Decimal::ZERO, PAYMENT_EPSILON),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            apply_payment(dec!(100), dec!(0), dec!(-5), PAYMENT_EPSILON),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn status_derivation_follows_rule_order() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let past = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let future = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();

        assert_eq!(
            derive_payment_status(dec!(100), dec!(100), Some(past), today, PAYMENT_EPSILON),
            PaymentStatus::Paid
        );
        // Within epsilon of fully paid counts as paid
        assert_eq!(
            derive_payment_status(dec!(100), dec!(99.9995), None, today, PAYMENT_EPSILON),
            PaymentStatus::Paid
        );
        assert_eq!(
            derive_payment_status(dec!(100), dec!(0), Some(past), today, PAYMENT_EPSILON),
            PaymentStatus::Unpaid
        );
        assert_eq!(
            derive_payment_status(dec!(100), dec!(40), Some(past), today, PAYMENT_EPSILON),
            PaymentStatus::Overdue
        );
        assert_eq!(
            derive_payment_status(dec!(100), dec!(40), Some(future), today, PAYMENT_EPSILON),
            PaymentStatus::Partial
        );
        assert_eq!(
            derive_payment_status(dec!(100), dec!(40), None, today, PAYMENT_EPSILON),
            PaymentStatus::Partial
        );
    }
}
