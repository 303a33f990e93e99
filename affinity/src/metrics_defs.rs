//! Metrics definitions for session affinity.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SESSION_ASSIGNMENTS: MetricDef = MetricDef {
    name: "affinity.assignments",
    metric_type: MetricType::Counter,
    description: "Number of sessions assigned to a backend",
};

pub const NO_BACKEND_AVAILABLE: MetricDef = MetricDef {
    name: "affinity.no_backend_available",
    metric_type: MetricType::Counter,
    description: "Number of selections that found no available backend",
};

pub const SESSIONS_RELEASED: MetricDef = MetricDef {
    name: "affinity.released",
    metric_type: MetricType::Counter,
    description: "Number of session affinities removed",
};

pub const ALL_METRICS: &[MetricDef] =
    &[SESSION_ASSIGNMENTS, NO_BACKEND_AVAILABLE, SESSIONS_RELEASED];
