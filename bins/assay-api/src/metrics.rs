// Prometheus counters for the intake API
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref JOBS_QUEUED: IntCounter =
        IntCounter::new("assay_jobs_queued_total", "Evaluation jobs pushed onto the queue").unwrap();

    pub static ref JOBS_REJECTED: IntCounter =
        IntCounter::new("assay_jobs_rejected_total", "Evaluation requests rejected by validation").unwrap();

    pub static ref FINGERPRINT_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("assay_fingerprint_requests_total", "Fingerprint endpoint calls"),
        &["endpoint"]
    )
    .unwrap();

    pub static ref RESULT_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("assay_result_lookups_total", "Evaluation result lookups by outcome"),
        &["outcome"]
    )
    .unwrap();
}

/// Register every collector. Safe to call more than once.
pub fn register() {
    // AlreadyReg is the only error register() returns for a valid collector
    let _ = REGISTRY.register(Box::new(JOBS_QUEUED.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_REJECTED.clone()));
    let _ = REGISTRY.register(Box::new(FINGERPRINT_REQUESTS.clone()));
    let _ = REGISTRY.register(Box::new(RESULT_LOOKUPS.clone()));
}

/// Render the registry in the Prometheus text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
