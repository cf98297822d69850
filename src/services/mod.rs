pub mod amendments;
pub mod invoicing;
pub mod payments;
pub mod petty_cash;
pub mod purchase_orders;

pub use amendments::AmendmentService;
pub use invoicing::InvoicingService;
pub use payments::PaymentService;
pub use petty_cash::PettyCashService;
pub use purchase_orders::PurchaseOrderService;

/// Computes the next document number for a `<prefix>-<year>-<seq>` series.
///
/// The sequence is one more than the highest existing sequence for that
/// year and prefix, compared numerically rather than lexicographically.
pub(crate) fn next_document_number(prefix: &str, year: i32, existing: &[String]) -> String {
    let tag = format!("{}-{}-", prefix, year);
    let next = existing
        .iter()
        .filter_map(|n| n.strip_prefix(&tag))
        .filter_map(|tail| tail.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
        + 1;
    format!("{}{:05}", tag, next)
}

#[cfg(test)]
mod tests {
    use super::next_document_number;

    #[test]
    fn first_number_in_a_series_starts_at_one() {
        assert_eq!(next_document_number("VB", 2025, &[]), "VB-2025-00001");
    }

    #[test]
    fn sequence_comparison_is_numeric_not_lexicographic() {
        let existing = vec![
            "VB-2025-00009".to_string(),
            "VB-2025-00100".to_string(),
            "VB-2025-00099".to_string(),
        ];
        assert_eq!(next_document_number("VB", 2025, &existing), "VB-2025-00101");
    }

    #[test]
    fn other_years_and_prefixes_do_not_leak_into_the_sequence() {
        let existing = vec![
            "VB-2024-00500".to_string(),
            "CB-2025-00900".to_string(),
            "VB-2025-00002".to_string(),
            "VB-2025-junk".to_string(),
        ];
        assert_eq!(next_document_number("VB", 2025, &existing), "VB-2025-00003");
    }
}
