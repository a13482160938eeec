//! Unauthenticated capability banner

use axum::Json;
use serde_json::{json, Value};

/// GET /info
pub async fn info_handler() -> Json<Value> {
    Json(json!({
        "service": "Mailvetter Engine",
        "version": env!("CARGO_PKG_VERSION"),
        "capabilities": [
            "Deep SMTP (VRFY, Postmaster, Ghost Probes)",
            "O365 Zombie Detection",
            "Catch-All Disambiguation",
            "Extended Socials (Adobe, GitHub, Gravatar)",
            "Infrastructure (SPF, DMARC, Domain Age)",
        ],
    }))
}
