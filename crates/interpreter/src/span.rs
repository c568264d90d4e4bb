use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const SERVICE_NAME: &str = "span.serviceName";
pub const SERVICE_URN: &str = "span.serviceURN";
pub const SERVICE_TYPE: &str = "span.serviceType";
pub const SERVICE_INSTANCE_URN: &str = "span.serviceInstanceURN";
pub const SPAN_KIND: &str = "span.kind";
pub const ERROR_CLASS: &str = "span.errorClass";
pub const SERVICE_IDENTIFIERS: &str = "sts.service.identifiers";
pub const HTTP_STATUS_CODE: &str = "http.status_code";

/// A single span of a distributed trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Span {
    pub service: String,
    pub name: String,
    pub resource: String,
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_id: u64,
    pub start: i64,
    pub duration: i64,
    /// Non-zero when the span recorded an error.
    pub error: i32,
    #[serde(rename = "type")]
    pub span_type: String,
    pub meta: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

pub type Trace = Vec<Span>;

impl Span {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<String>) {
        self.meta.insert(key.to_string(), value.into());
    }

    /// Whether the tracing client already resolved this span's service.
    pub fn is_interpreted(&self) -> bool {
        self.meta.contains_key(SERVICE_URN)
    }

    /// Sets `span.errorClass` from the HTTP status of an errored span.
    pub fn classify_http_error(&mut self) {
        if self.error == 0 {
            return;
        }
        let Some(status) = self.metrics.get(HTTP_STATUS_CODE).copied() else {
            return;
        };
        if (400.0..500.0).contains(&status) {
            self.set_meta(ERROR_CLASS, "4xx");
        } else if status >= 500.0 {
            self.set_meta(ERROR_CLASS, "5xx");
        }
    }
}

/// Process information a tracing client attaches to typed spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanMetadata {
    pub span_type: String,
    pub hostname: String,
    pub pid: i64,
    pub create_time: i64,
    pub kind: Option<String>,
}

impl SpanMetadata {
    /// Present when the span has a type and its process is fully described.
    pub fn extract(span: &Span) -> Option<Self> {
        if span.span_type.is_empty() {
            return None;
        }
        let hostname = span.meta("span.hostname").filter(|h| !h.is_empty())?;
        let pid = span.meta("span.pid")?.parse().ok()?;
        let create_time = span.meta("span.starttime")?.parse().ok()?;
        Some(Self {
            span_type: span.span_type.clone(),
            hostname: hostname.to_string(),
            pid,
            create_time,
            kind: span.meta(SPAN_KIND).map(String::from),
        })
    }
}
