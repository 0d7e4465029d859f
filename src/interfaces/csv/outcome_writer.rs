use crate::domain::provider::ProviderId;
use crate::domain::transaction::PaymentOutcome;
use crate::error::{PaymentError, Result};
use serde::Serialize;
use std::io::Write;

/// One output row per submitted request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeRecord {
    pub order_id: String,
    pub provider: Option<ProviderId>,
    pub status: String,
    pub external_ref: Option<String>,
    pub error: Option<String>,
}

impl OutcomeRecord {
    pub fn from_result(order_id: &str, result: &Result<PaymentOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                order_id: outcome.order_id.clone(),
                provider: Some(outcome.provider),
                status: outcome.status.to_string(),
                external_ref: Some(outcome.external_ref.clone()),
                error: None,
            },
            Err(err) => Self {
                order_id: order_id.to_string(),
                provider: None,
                status: "failed".to_string(),
                external_ref: None,
                error: Some(err.to_string()),
            },
        }
    }
}

pub struct OutcomeWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OutcomeWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_outcomes(&mut self, records: impl IntoIterator<Item = OutcomeRecord>) -> Result<()> {
        for record in records {
            self.writer.serialize(record)?;
        }
        self.writer.flush().map_err(PaymentError::from)
    }
}
