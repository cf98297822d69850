pub mod bank_account;
pub mod bank_transaction;
pub mod inventory_lot;
pub mod inventory_transaction;
pub mod invoice;
pub mod invoice_payment;
pub mod petty_cash_card;
pub mod petty_cash_expense;
pub mod purchase_order;
pub mod purchase_order_amendment;
pub mod purchase_order_item;
