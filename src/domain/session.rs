use super::provider::ProviderId;
use tokio::time::Instant;

/// A reusable transport session lent to a provider client for one call.
///
/// Sessions are owned by the invocation wrapper; clients only read from them.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: u64,
    pub provider: ProviderId,
    pub created_at: Instant,
    pub headers: Vec<(String, String)>,
}

impl Session {
    pub fn new(id: u64, provider: ProviderId) -> Self {
        Self {
            id,
            provider,
            created_at: Instant::now(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Accept".to_string(), "application/json".to_string()),
                (
                    "User-Agent".to_string(),
                    format!("pgflow/{}", provider.as_str()),
                ),
            ],
        }
    }
}
