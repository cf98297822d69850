mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::{manager_ctx, money, TestApp};
use procure_api::entities::invoice::{BillType, CompanyBillStatus};
use procure_api::errors::ServiceError;
use procure_api::services::invoicing::{CreateCompanyBillRequest, CreateVendorBillRequest};
use procure_api::services::payments::{PaymentMethod, RecordPaymentRequest};
use procure_api::services::purchase_orders::{CreatePurchaseOrderRequest, NewOrderItem};

fn line(quantity: &str, unit_price: &str) -> NewOrderItem {
    let quantity = money(quantity);
    let unit_price = money(unit_price);
    NewOrderItem {
        material_id: Uuid::new_v4(),
        quantity,
        unit_price,
        total_price: quantity * unit_price,
        notes: None,
    }
}

/// Creates a one-line order for `supplier_id` with the given subtotal.
async fn seed_order(
    app: &TestApp,
    supplier_id: Uuid,
    subtotal: &str,
) -> procure_api::entities::purchase_order::Model {
    app.services
        .purchase_orders
        .create_order(CreatePurchaseOrderRequest {
            supplier_id,
            project_id: None,
            order_date: None,
            expected_delivery_date: None,
            items: vec![line("1", subtotal)],
            shipping_cost: None,
            discount_amount: None,
            notes: None,
        })
        .await
        .unwrap()
}

fn company_bill_request(order_id: Uuid, number: &str) -> CreateCompanyBillRequest {
    CreateCompanyBillRequest {
        purchase_order_id: order_id,
        invoice_number: number.to_string(),
        invoice_date: None,
        due_date: None,
        payment_terms_days: Some(30),
        notes: None,
    }
}

fn vendor_bill_request(
    supplier_id: Uuid,
    covers_company_bills: Vec<Uuid>,
) -> CreateVendorBillRequest {
    CreateVendorBillRequest {
        supplier_id,
        invoice_date: None,
        invoice_amount: None,
        covers_company_bills: Some(covers_company_bills),
        covers_purchase_orders: None,
        due_date: None,
        payment_terms_days: Some(30),
        notes: None,
    }
}

#[tokio::test]
async fn company_bill_mirrors_the_order_amount() {
    let app = TestApp::new().await;
    let supplier_id = Uuid::new_v4();
    let order = seed_order(&app, supplier_id, "1000").await;

    let bill = app
        .services
        .invoicing
        .create_company_bill(company_bill_request(order.id, "2025-00042"))
        .await
        .unwrap();

    assert_eq!(bill.invoice_number, "CB-2025-00042");
    assert_eq!(bill.invoice_amount, order.total_amount);
    assert_eq!(bill.balance_due, order.total_amount);
    assert_eq!(bill.supplier_id, supplier_id);
    assert_eq!(
        bill.bill_status.as_deref(),
        Some(CompanyBillStatus::Draft.to_string().as_str())
    );
    assert!(bill.payment_status.is_none());
}

#[tokio::test]
async fn one_company_bill_per_order() {
    let app = TestApp::new().await;
    let order = seed_order(&app, Uuid::new_v4(), "100").await;

    app.services
        .invoicing
        .create_company_bill(company_bill_request(order.id, "A-1"))
        .await
        .unwrap();
    let err = app
        .services
        .invoicing
        .create_company_bill(company_bill_request(order.id, "A-2"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AlreadyLinked { .. });
}

#[tokio::test]
async fn vendor_bill_sums_its_covered_company_bills() {
    let app = TestApp::new().await;
    let supplier_id = Uuid::new_v4();
    let first_order = seed_order(&app, supplier_id, "476.19").await;
    let second_order = seed_order(&app, supplier_id, "285.714").await;
    let first = app
        .services
        .invoicing
        .create_company_bill(company_bill_request(first_order.id, "B-1"))
        .await
        .unwrap();
    let second = app
        .services
        .invoicing
        .create_company_bill(company_bill_request(second_order.id, "B-2"))
        .await
        .unwrap();

    let vendor = app
        .services
        .invoicing
        .create_vendor_bill(vendor_bill_request(
            supplier_id,
            vec![first.id, second.id],
        ))
        .await
        .unwrap();

    assert_eq!(vendor.bill_type, BillType::Vendor.to_string());
    assert_eq!(
        vendor.invoice_amount,
        first.invoice_amount + second.invoice_amount
    );
    assert!(vendor.invoice_number.starts_with("VB-"));
    assert_eq!(vendor.payment_status.as_deref(), Some("unpaid"));
}

#[tokio::test]
async fn coverage_is_exclusive_across_vendor_bills() {
    let app = TestApp::new().await;
    let supplier_id = Uuid::new_v4();
    let order = seed_order(&app, supplier_id, "100").await;
    let bill = app
        .services
        .invoicing
        .create_company_bill(company_bill_request(order.id, "C-1"))
        .await
        .unwrap();

    app.services
        .invoicing
        .create_vendor_bill(vendor_bill_request(supplier_id, vec![bill.id]))
        .await
        .unwrap();
    let err = app
        .services
        .invoicing
        .create_vendor_bill(vendor_bill_request(supplier_id, vec![bill.id]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AlreadyLinked { references } if references == vec![bill.id]);
}

#[tokio::test]
async fn coverage_lists_are_mutually_exclusive() {
    let app = TestApp::new().await;
    let supplier_id = Uuid::new_v4();
    let order = seed_order(&app, supplier_id, "100").await;

    let mut request = vendor_bill_request(supplier_id, vec![Uuid::new_v4()]);
    request.covers_purchase_orders = Some(vec![order.id]);
    let err = app
        .services
        .invoicing
        .create_vendor_bill(request)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let mut empty = vendor_bill_request(supplier_id, vec![]);
    empty.covers_company_bills = None;
    let err = app
        .services
        .invoicing
        .create_vendor_bill(empty)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn vendor_bill_may_cover_orders_directly() {
    let app = TestApp::new().await;
    let supplier_id = Uuid::new_v4();
    let order = seed_order(&app, supplier_id, "200").await;

    let mut request = vendor_bill_request(supplier_id, vec![]);
    request.covers_company_bills = None;
    request.covers_purchase_orders = Some(vec![order.id]);
    let vendor = app
        .services
        .invoicing
        .create_vendor_bill(request)
        .await
        .unwrap();
    assert_eq!(vendor.invoice_amount, order.total_amount);
}

#[tokio::test]
async fn directly_covered_orders_are_exclusive_too() {
    let app = TestApp::new().await;
    let supplier_id = Uuid::new_v4();
    let order = seed_order(&app, supplier_id, "200").await;

    let mut request = vendor_bill_request(supplier_id, vec![]);
    request.covers_company_bills = None;
    request.covers_purchase_orders = Some(vec![order.id]);
    app.services
        .invoicing
        .create_vendor_bill(request.clone())
        .await
        .unwrap();

    let err = app
        .services
        .invoicing
        .create_vendor_bill(request)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AlreadyLinked { references } if references == vec![order.id]);
}

#[tokio::test]
async fn vendor_bills_reject_foreign_suppliers() {
    let app = TestApp::new().await;
    let order = seed_order(&app, Uuid::new_v4(), "100").await;
    let bill = app
        .services
        .invoicing
        .create_company_bill(company_bill_request(order.id, "D-1"))
        .await
        .unwrap();

    let err = app
        .services
        .invoicing
        .create_vendor_bill(vendor_bill_request(Uuid::new_v4(), vec![bill.id]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn vendor_bills_only_cover_company_bills() {
    let app = TestApp::new().await;
    let supplier_id = Uuid::new_v4();
    let order = seed_order(&app, supplier_id, "100").await;
    let bill = app
        .services
        .invoicing
        .create_company_bill(company_bill_request(order.id, "E-1"))
        .await
        .unwrap();
    let vendor = app
        .services
        .invoicing
        .create_vendor_bill(vendor_bill_request(supplier_id, vec![bill.id]))
        .await
        .unwrap();

    // A vendor bill cannot itself be covered.
    let err = app
        .services
        .invoicing
        .create_vendor_bill(vendor_bill_request(supplier_id, vec![vendor.id]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::WrongBillType(_));
}

#[tokio::test]
async fn company_bill_status_moves_between_draft_and_sent() {
    let app = TestApp::new().await;
    let order = seed_order(&app, Uuid::new_v4(), "100").await;
    let bill = app
        .services
        .invoicing
        .create_company_bill(company_bill_request(order.id, "F-1"))
        .await
        .unwrap();

    let bill = app
        .services
        .invoicing
        .update_status(bill.id, CompanyBillStatus::Sent)
        .await
        .unwrap();
    assert_eq!(bill.bill_status.as_deref(), Some("sent"));
}

#[tokio::test]
async fn vendor_bills_reject_bill_status_updates() {
    let app = TestApp::new().await;
    let supplier_id = Uuid::new_v4();
    let order = seed_order(&app, supplier_id, "100").await;
    let mut request = vendor_bill_request(supplier_id, vec![]);
    request.covers_company_bills = None;
    request.covers_purchase_orders = Some(vec![order.id]);
    let vendor = app
        .services
        .invoicing
        .create_vendor_bill(request)
        .await
        .unwrap();

    let err = app
        .services
        .invoicing
        .update_status(vendor.id, CompanyBillStatus::Sent)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::WrongBillType(_));
}

#[tokio::test]
async fn invoices_with_payments_cannot_be_deleted() {
    let app = TestApp::new().await;
    let ctx = manager_ctx();
    let supplier_id = Uuid::new_v4();
    let order = seed_order(&app, supplier_id, "100").await;
    let mut request = vendor_bill_request(supplier_id, vec![]);
    request.covers_company_bills = None;
    request.covers_purchase_orders = Some(vec![order.id]);
    let vendor = app
        .services
        .invoicing
        .create_vendor_bill(request)
        .await
        .unwrap();

    app.services
        .payments
        .record_payment(
            RecordPaymentRequest {
                invoice_id: vendor.id,
                amount: dec!(10),
                method: PaymentMethod::Cash,
                reference: None,
                bank_account_id: None,
                notes: None,
            },
            &ctx,
        )
        .await
        .unwrap();

    let err = app
        .services
        .invoicing
        .delete_invoice(vendor.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::HasPayments(id) if id == vendor.id);

    // An unpaid bill deletes fine.
    let other = seed_order(&app, supplier_id, "50").await;
    let bill = app
        .services
        .invoicing
        .create_company_bill(company_bill_request(other.id, "G-1"))
        .await
        .unwrap();
    app.services.invoicing.delete_invoice(bill.id).await.unwrap();
    assert!(app
        .services
        .invoicing
        .get_invoice(bill.id)
        .await
        .unwrap()
        .is_none());
}
