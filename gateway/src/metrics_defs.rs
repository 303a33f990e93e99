//! Metrics definitions for the gateway.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "gateway.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent handling an API request. Tagged by call and returncode",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "gateway.requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of API requests currently being handled",
};

pub const BACKEND_CALL_DURATION: MetricDef = MetricDef {
    name: "gateway.backend.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of outbound calls to backends. Tagged by call and backend",
};

pub const BACKEND_CALL_FAILURES: MetricDef = MetricDef {
    name: "gateway.backend.failures",
    metric_type: MetricType::Counter,
    description: "Outbound calls that failed at the transport level or timed out",
};

pub const FANOUT_BACKEND_FAILURES: MetricDef = MetricDef {
    name: "gateway.fanout.backend_failures",
    metric_type: MetricType::Counter,
    description: "Backends that failed during a cluster listing. Tagged by policy",
};

pub const SESSIONS_SELF_HEALED: MetricDef = MetricDef {
    name: "gateway.sessions.self_healed",
    metric_type: MetricType::Counter,
    description: "Stale affinities removed after a backend reported the session missing",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    BACKEND_CALL_DURATION,
    BACKEND_CALL_FAILURES,
    FANOUT_BACKEND_FAILURES,
    SESSIONS_SELF_HEALED,
];
