use serde::Serialize;

/// Derived amounts of a purchase. Values keep full precision; round only
/// when displaying them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Amounts {
    pub total: f64,
    pub discount_amount: f64,
    pub final_amount: f64,
}

pub fn compute_amounts(weight: f64, price_per_gram: f64, discount_percentage: f64) -> Amounts {
    let total = weight * price_per_gram;
    let discount_amount = total * discount_percentage / 100.0;
    Amounts {
        total,
        discount_amount,
        final_amount: total - discount_amount,
    }
}

/// Currency, two decimals.
pub fn format_money(value: f64) -> String {
    format!("{:.2}", value)
}

/// Grams, three decimals.
pub fn format_weight(value: f64) -> String {
    format!("{:.3}", value)
}
