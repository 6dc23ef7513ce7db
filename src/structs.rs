use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{amounts::compute_amounts, errors::AppError, utils};

pub const GOLD_TYPES: [&str; 3] = ["24K", "22K", "18K"];
pub const GOLD_QUALITIES: [&str; 3] = ["Pure", "Standard", "Premium"];
pub const PAYMENT_MODES: [&str; 4] = ["Cash", "UPI", "Bank Transfer", "Card"];

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, FromRow)]
pub struct User {
    pub id: i64,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub remark: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct UserData {
    pub last_name: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub remark: Option<String>,
}

impl UserData {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.last_name.trim().is_empty() || self.first_name.trim().is_empty() {
            return Err(AppError::Validation(
                "First and last name are required".to_string(),
            ));
        }
        Ok(())
    }
}

/// One gold purchase.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, FromRow)]
pub struct Customer {
    pub id: i64,
    pub customer_name: String,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub state: Option<String>,
    pub purchase_date: NaiveDateTime,
    pub gold_type: Option<String>,
    pub gold_quality: Option<String>,
    pub gold_weight: f64,
    pub price_per_gram: f64,
    pub total_amount: f64,
    pub discount_percentage: f64,
    pub discount_amount: f64,
    pub final_amount: f64,
    pub payment_mode: Option<String>,
    pub notes: Option<String>,
}

impl Customer {
    /// `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        let contains = |field: Option<&str>| {
            field.is_some_and(|value| value.to_lowercase().contains(needle))
        };
        contains(Some(self.customer_name.as_str()))
            || contains(self.phone_number.as_deref())
            || contains(self.email.as_deref())
    }
}

#[cfg(test)]
impl Customer {
    pub fn data(&self) -> CustomerData {
        CustomerData {
            customer_name: self.customer_name.clone(),
            phone_number: self.phone_number.clone(),
            email: self.email.clone(),
            address: self.address.clone(),
            state: self.state.clone(),
            purchase_date: self.purchase_date,
            gold_type: self.gold_type.clone(),
            gold_quality: self.gold_quality.clone(),
            gold_weight: self.gold_weight,
            price_per_gram: self.price_per_gram,
            total_amount: self.total_amount,
            discount_percentage: self.discount_percentage,
            discount_amount: self.discount_amount,
            final_amount: self.final_amount,
            payment_mode: self.payment_mode.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// Every writable customer column. Stored as given: the amounts are not
/// recomputed here.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CustomerData {
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(
        default = "utils::now",
        deserialize_with = "utils::deserialize_date_or_now"
    )]
    pub purchase_date: NaiveDateTime,
    #[serde(default)]
    pub gold_type: Option<String>,
    #[serde(default)]
    pub gold_quality: Option<String>,
    #[serde(default)]
    pub gold_weight: f64,
    #[serde(default)]
    pub price_per_gram: f64,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub discount_percentage: f64,
    #[serde(default)]
    pub discount_amount: f64,
    #[serde(default)]
    pub final_amount: f64,
    #[serde(default)]
    pub payment_mode: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CustomerData {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.customer_name.trim().is_empty() {
            return Err(AppError::Validation("Customer name is required".to_string()));
        }
        Ok(())
    }

    /// True when the stored amounts agree with weight, price and discount.
    pub fn amounts_consistent(&self) -> bool {
        let expected = compute_amounts(
            self.gold_weight,
            self.price_per_gram,
            self.discount_percentage,
        );
        let close = |a: f64, b: f64| (a - b).abs() <= 0.01_f64.max(b.abs() * 1e-9);
        close(self.total_amount, expected.total)
            && close(self.discount_amount, expected.discount_amount)
            && close(self.final_amount, expected.final_amount)
    }
}

/// The add/edit form as posted by the browser. Amounts are not part of the
/// form; they are always derived.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CustomerForm {
    pub customer_name: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub purchase_date: String,
    pub gold_type: String,
    pub gold_quality: String,
    pub gold_weight: String,
    pub price_per_gram: String,
    #[serde(default)]
    pub discount_percentage: String,
    pub payment_mode: String,
    #[serde(default)]
    pub notes: String,
}

impl CustomerForm {
    pub fn into_data(self) -> Result<CustomerData, AppError> {
        let name = self.customer_name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Customer name is required".to_string()));
        }
        check_choice("gold type", &self.gold_type, &GOLD_TYPES)?;
        check_choice("gold quality", &self.gold_quality, &GOLD_QUALITIES)?;
        check_choice("payment mode", &self.payment_mode, &PAYMENT_MODES)?;

        let gold_weight = parse_in_range("weight", &self.gold_weight, 10_000.0)?;
        let price_per_gram = parse_in_range("price per gram", &self.price_per_gram, 100_000.0)?;
        let discount_percentage = if self.discount_percentage.trim().is_empty() {
            0.0
        } else {
            parse_in_range("discount", &self.discount_percentage, 100.0)?
        };
        let amounts = compute_amounts(gold_weight, price_per_gram, discount_percentage);

        Ok(CustomerData {
            customer_name: name.to_string(),
            phone_number: Some(self.phone_number.trim().to_string()),
            email: Some(self.email.trim().to_string()),
            address: Some(self.address.trim().to_string()),
            state: Some(self.state.trim().to_string()),
            purchase_date: utils::parse_date_or_now(&self.purchase_date),
            gold_type: Some(self.gold_type),
            gold_quality: Some(self.gold_quality),
            gold_weight,
            price_per_gram,
            total_amount: amounts.total,
            discount_percentage,
            discount_amount: amounts.discount_amount,
            final_amount: amounts.final_amount,
            payment_mode: Some(self.payment_mode),
            notes: Some(self.notes.trim().to_string()),
        })
    }
}

fn check_choice(label: &str, value: &str, allowed: &[&str]) -> Result<(), AppError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Invalid {}: must be one of {}",
            label,
            allowed.join(", ")
        )))
    }
}

fn parse_in_range(label: &str, value: &str, max: f64) -> Result<f64, AppError> {
    let parsed = value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            AppError::Validation("Please enter valid numbers for weight, price, and discount".to_string())
        })?;
    if !(0.0..=max).contains(&parsed) {
        return Err(AppError::Validation(format!(
            "The {} must be between 0 and {}",
            label, max
        )));
    }
    Ok(parsed)
}

/// Search query parameter shared by the HTML and JSON listings.
#[derive(Deserialize, Debug, Default)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub success_count: usize,
    pub error_count: usize,
}

impl ImportReport {
    /// Lines shown to the user once an import finishes.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Successfully imported {} records.",
            self.success_count
        )];
        if self.error_count > 0 {
            lines.push(format!("Failed to import {} records.", self.error_count));
            lines.push("Check the logs for details.".to_string());
        }
        lines
    }
}
