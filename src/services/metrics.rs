use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::models::Debit;

pub struct Metrics {
    registry: Registry,
    pub http_requests: IntCounterVec,
    pub credit_debits: IntCounterVec,
    pub image_operations: IntCounterVec,
    pub store_errors: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("visiora".to_string()), None)?;

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by method and status class"),
            &["method", "status"],
        )?;
        let credit_debits = IntCounterVec::new(
            Opts::new("credit_debits_total", "Debit attempts by owner kind and outcome"),
            &["owner", "outcome"],
        )?;
        let image_operations = IntCounterVec::new(
            Opts::new("image_operations_total", "Image store operations by outcome"),
            &["operation", "outcome"],
        )?;
        let store_errors = IntCounterVec::new(
            Opts::new("store_errors_total", "Provider errors swallowed by the core"),
            &["operation"],
        )?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(credit_debits.clone()))?;
        registry.register(Box::new(image_operations.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            credit_debits,
            image_operations,
            store_errors,
        })
    }

    pub fn record_debit(&self, owner: &str, debit: &Debit) {
        self.credit_debits
            .with_label_values(&[owner, debit.outcome()])
            .inc();
    }

    pub fn record_image_operation(&self, operation: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "failed" };
        self.image_operations
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn record_store_error(&self, operation: &str) {
        self.store_errors.with_label_values(&[operation]).inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
