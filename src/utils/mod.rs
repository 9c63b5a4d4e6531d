//! Shared helpers

pub mod logger;
pub mod timer;

use chrono::Utc;

/// Unique record id, e.g. `run-20250101120000123456-3f9a01c2`
pub fn generate_id(prefix: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S%6f");
    let random: u32 = rand::random::<u32>();
    format!("{prefix}-{timestamp}-{random:08x}")
}
