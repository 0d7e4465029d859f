use crate::domain::transaction::TransactionRequest;
use crate::error::{PaymentError, Result};
use std::io::Read;

/// Reads payment requests from a CSV source.
///
/// Expects the columns `order_id, order_name, amount, currency, method, customer_ref`.
/// Whitespace around fields is trimmed. Rows that fail to deserialize, or that
/// carry a non-positive amount, come back as errors without ending the stream.
pub struct RequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RequestReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and validates requests, one per row.
    pub fn requests(self) -> impl Iterator<Item = Result<TransactionRequest>> {
        self.reader.into_deserialize().map(|result| {
            let request: TransactionRequest = result.map_err(PaymentError::from)?;
            request.validate()?;
            Ok(request)
        })
    }
}
