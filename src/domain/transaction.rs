use super::money::Amount;
use super::provider::ProviderId;
use crate::error::PaymentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Transfer,
    VirtualAccount,
    Mobile,
    EasyPay,
    Point,
    GiftCertificate,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Ready,
    InProgress,
    WaitingForDeposit,
    Done,
    Confirmed,
    Canceled,
    PartialCanceled,
    Failed,
    Expired,
    NotFound,
    Unknown,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::WaitingForDeposit => "waiting_for_deposit",
            Self::Done => "done",
            Self::Confirmed => "confirmed",
            Self::Canceled => "canceled",
            Self::PartialCanceled => "partial_canceled",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::NotFound => "not_found",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable request to charge a customer for one order.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TransactionRequest {
    order_id: String,
    order_name: String,
    amount: Amount,
    currency: String,
    method: PaymentMethod,
    customer_ref: String,
}

impl TransactionRequest {
    pub fn new(
        order_id: impl Into<String>,
        order_name: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        method: PaymentMethod,
        customer_ref: impl Into<String>,
    ) -> Result<Self, PaymentError> {
        let request = Self {
            order_id: order_id.into(),
            order_name: order_name.into(),
            amount: Amount::new(amount)?,
            currency: currency.into(),
            method,
            customer_ref: customer_ref.into(),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn order_name(&self) -> &str {
        &self.order_name
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn customer_ref(&self) -> &str {
        &self.customer_ref
    }

    /// Checks the fields a provider would reject, so no attempt is wasted on them.
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.order_id.trim().is_empty() || self.order_id.len() > 100 {
            return Err(PaymentError::ValidationError(
                "order_id must be 1 to 100 characters".to_string(),
            ));
        }
        if self.order_name.trim().is_empty() || self.order_name.len() > 100 {
            return Err(PaymentError::ValidationError(
                "order_name must be 1 to 100 characters".to_string(),
            ));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(PaymentError::ValidationError(format!(
                "currency must be a 3-letter ISO code, got '{}'",
                self.currency
            )));
        }
        if self.customer_ref.trim().is_empty() {
            return Err(PaymentError::ValidationError(
                "customer_ref is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    CustomerRequest,
    AdminRequest,
    FraudDetection,
    PaymentError,
    Duplicate,
    Other,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct CancelRequest {
    pub reason: CancelReason,
    /// Partial cancellation amount; `None` cancels the full payment.
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl CancelRequest {
    pub fn full(reason: CancelReason) -> Self {
        Self {
            reason,
            amount: None,
            detail: None,
        }
    }
}

/// What a provider hands back when a transaction is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedTransaction {
    pub external_ref: String,
    pub status: TransactionStatus,
    pub raw: Value,
}

/// What a provider hands back for confirm, query and cancel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub status: TransactionStatus,
    pub raw: Value,
}

impl ProviderResponse {
    pub fn not_found() -> Self {
        Self {
            status: TransactionStatus::NotFound,
            raw: Value::Null,
        }
    }
}

/// A created transaction together with the provider that accepted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub provider: ProviderId,
    pub order_id: String,
    pub external_ref: String,
    pub status: TransactionStatus,
    pub raw: Value,
}
