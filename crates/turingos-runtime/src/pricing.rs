//! Deterministic scoring of worker outputs.
//!
//! `price = 1.0 + 0.25 * ceil(chars / 500) + 0.05 * ticks`
//!
//! An output is anomalous when it is blank, shorter than
//! [`MIN_OUTPUT_CHARS`], or just echoes the task (trimmed, case-insensitive).

use serde::Serialize;

pub const BASE_PRICE: f64 = 1.0;
pub const PRICE_PER_CHUNK: f64 = 0.25;
pub const CHUNK_CHARS: usize = 500;
pub const PRICE_PER_TICK: f64 = 0.05;
pub const MIN_OUTPUT_CHARS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub price: f64,
    pub chars: usize,
    pub ticks: u64,
    /// Why the output is anomalous, if it is.
    pub anomaly: Option<&'static str>,
}

impl PriceQuote {
    pub fn is_anomalous(&self) -> bool {
        self.anomaly.is_some()
    }
}

pub fn quote(task: &str, output: &str, ticks: u64) -> PriceQuote {
    let chars = output.chars().count();
    let chunks = chars.div_ceil(CHUNK_CHARS);
    let price = BASE_PRICE + PRICE_PER_CHUNK * chunks as f64 + PRICE_PER_TICK * ticks as f64;

    let trimmed = output.trim();
    let anomaly = if trimmed.is_empty() {
        Some("blank")
    } else if trimmed.chars().count() < MIN_OUTPUT_CHARS {
        Some("too_short")
    } else if trimmed.to_lowercase() == task.trim().to_lowercase() {
        Some("echoes_task")
    } else {
        None
    };

    PriceQuote {
        price,
        chars,
        ticks,
        anomaly,
    }
}
