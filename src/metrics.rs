//! Maintaining and outputting metrics.
//!
//! Relevant sources for selecting metrics, metric names, and labels:
//! - https://prometheus.io/docs/practices/naming/
//! - https://prometheus.io/docs/instrumenting/writing_exporters/#labels
//! - https://prometheus.io/docs/practices/instrumentation/
//! - https://github.com/prometheus/OpenMetrics/blob/main/specification/OpenMetrics.md

use core::sync::atomic::AtomicU64;
use std::fmt;
use std::time::Instant;

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::info::Info;
use prometheus_client::registry::{Metric, Registry, Unit};

use crate::transport::Transport;
use crate::validator::ValidationOutcome;

//------------ Module Configuration ------------------------------------------

/// The application prefix to use in the names of Prometheus metrics.
const PROMETHEUS_PREFIX: &str = "tdns";

//------------ MetricsCollection ---------------------------------------------

#[derive(Debug)]
pub struct MetricsCollection {
    /// The metrics registry for every metric in the process. Units
    /// register their metrics with this registry.
    pub registry: Registry,

    /// Time it took to assemble the last metrics snapshot.
    assemble_time_metric: Gauge<u64, AtomicU64>,

    cache_metrics: CacheMetrics,
    backoff_metrics: BackoffMetrics,
    validator_metrics: ValidatorMetrics,
}

impl MetricsCollection {
    pub fn new() -> Self {
        let mut col = Self {
            registry: Registry::with_prefix(PROMETHEUS_PREFIX),
            assemble_time_metric: Default::default(),
            cache_metrics: Default::default(),
            backoff_metrics: Default::default(),
            validator_metrics: Default::default(),
        };

        let build_info = Info::new(vec![("version", clap::crate_version!())]);
        col.registry.register("build", "tdns-core build information", build_info);

        col.registry.register_with_unit(
            "metrics_assemble_duration",
            "The time taken in milliseconds to assemble the last metric snapshot",
            Unit::Other("milliseconds".into()),
            col.assemble_time_metric.clone(),
        );

        col.cache_metrics.register_metrics(&mut col.registry);
        col.backoff_metrics.register_metrics(&mut col.registry);
        col.validator_metrics.register_metrics(&mut col.registry);

        col
    }

    pub fn cache(&self) -> &CacheMetrics {
        &self.cache_metrics
    }

    pub fn backoff(&self) -> &BackoffMetrics {
        &self.backoff_metrics
    }

    pub fn validator(&self) -> &ValidatorMetrics {
        &self.validator_metrics
    }

    /// Turn metrics into a [`String`], stamping the assemble-duration gauge
    /// first.
    pub fn assemble(&self) -> Result<String, fmt::Error> {
        let start_time = Instant::now();
        let assemble_ms = start_time.elapsed().as_millis() as u64;
        self.assemble_time_metric.set(assemble_ms);
        String::try_from(self)
    }

    pub fn register<N: Into<String>, H: Into<String>>(&mut self, name: N, help: H, metric: impl Metric) {
        self.registry.register(name, help, metric)
    }

    pub fn register_with_unit<N: Into<String>, H: Into<String>>(
        &mut self,
        name: N,
        help: H,
        unit: Unit,
        metric: impl Metric,
    ) {
        self.registry.register_with_unit(name, help, unit, metric)
    }
}

impl TryFrom<&MetricsCollection> for String {
    type Error = fmt::Error;

    fn try_from(metrics: &MetricsCollection) -> Result<Self, Self::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry)?;
        Ok(buffer)
    }
}

impl Default for MetricsCollection {
    fn default() -> Self {
        Self::new()
    }
}

//------------ TransportLabel --------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum TransportLabel {
    Do53,
    Dot,
    Doh,
    Doq,
}

impl From<Transport> for TransportLabel {
    fn from(t: Transport) -> Self {
        match t {
            Transport::Do53 => TransportLabel::Do53,
            Transport::Dot => TransportLabel::Dot,
            Transport::Doh => TransportLabel::Doh,
            Transport::Doq => TransportLabel::Doq,
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransportLabels {
    pub transport: TransportLabel,
}

//------------ CacheMetrics ---------------------------------------------------

/// RRset cache hit/miss/eviction counters (`spec.md` §4.3).
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub rrset_hits: Counter,
    pub rrset_misses: Counter,
    pub rrset_expirations: Counter,
    pub flush_domain_entries_removed: Counter,
}

impl CacheMetrics {
    pub fn register_metrics(&self, reg: &mut Registry) {
        reg.register("rrset_cache_hits", "RRset cache lookups that hit a live entry", self.rrset_hits.clone());
        reg.register("rrset_cache_misses", "RRset cache lookups that found no entry", self.rrset_misses.clone());
        reg.register(
            "rrset_cache_expirations",
            "RRset cache entries removed for being expired on lookup",
            self.rrset_expirations.clone(),
        );
        reg.register(
            "rrset_cache_flush_domain_entries_removed",
            "Entries removed by FlushDomain calls",
            self.flush_domain_entries_removed.clone(),
        );
    }
}

//------------ BackoffMetrics -------------------------------------------------

/// Per-transport address-backoff transition counters (`spec.md` §4.4).
#[derive(Debug, Default)]
pub struct BackoffMetrics {
    pub failures: Family<TransportLabels, Counter>,
    pub successes: Family<TransportLabels, Counter>,
    pub addresses_in_backoff: Gauge,
}

impl BackoffMetrics {
    pub fn register_metrics(&self, reg: &mut Registry) {
        reg.register("address_backoff_failures", "Address exchange failures recorded by transport", self.failures.clone());
        reg.register("address_backoff_successes", "Address exchange successes recorded by transport", self.successes.clone());
        reg.register("addresses_in_backoff", "Addresses currently excluded from selection", self.addresses_in_backoff.clone());
    }
}

//------------ ValidatorMetrics ------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum ValidationOutcomeLabel {
    Secure,
    Insecure,
    Bogus,
    Indeterminate,
}

impl From<ValidationOutcome> for ValidationOutcomeLabel {
    fn from(outcome: ValidationOutcome) -> Self {
        match outcome {
            ValidationOutcome::Secure => ValidationOutcomeLabel::Secure,
            ValidationOutcome::Insecure => ValidationOutcomeLabel::Insecure,
            ValidationOutcome::Bogus => ValidationOutcomeLabel::Bogus,
            ValidationOutcome::Indeterminate => ValidationOutcomeLabel::Indeterminate,
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ValidationOutcomeLabels {
    pub outcome: ValidationOutcomeLabel,
}

/// DNSSEC validation outcome counters (`spec.md` §4.5).
#[derive(Debug, Default)]
pub struct ValidatorMetrics {
    pub outcomes: Family<ValidationOutcomeLabels, Counter>,
}

impl ValidatorMetrics {
    pub fn register_metrics(&self, reg: &mut Registry) {
        reg.register("validator_outcomes", "RRset validation outcomes by validation state", self.outcomes.clone());
    }

    pub fn record(&self, outcome: ValidationOutcome) {
        self.outcomes
            .get_or_create(&ValidationOutcomeLabels { outcome: outcome.into() })
            .inc();
    }
}
