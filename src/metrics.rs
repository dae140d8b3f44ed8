use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, TextEncoder, register_histogram,
    register_int_counter, register_int_counter_vec,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: IntCounter =
        register_int_counter!("elf_requests_total", "Total number of API requests").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "elf_request_latency_seconds",
        "Request latency in seconds"
    )
    .unwrap();
    pub static ref DISPATCH_ATTEMPTS: IntCounter = register_int_counter!(
        "elf_dispatch_attempts_total",
        "Upstream calls made through the key pool"
    )
    .unwrap();
    pub static ref KEY_COOLDOWNS: IntCounterVec = register_int_counter_vec!(
        "elf_key_cooldowns_total",
        "API keys put on cooldown, by failure kind",
        &["kind"]
    )
    .unwrap();
    pub static ref FALLBACK_LETTERS: IntCounter = register_int_counter!(
        "elf_fallback_letters_total",
        "Letters served from the static fallback"
    )
    .unwrap();
}

// Text exposition of everything in the default registry
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
