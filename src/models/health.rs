use serde::{Deserialize, Serialize};

/// API response for health and readiness checks
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}
