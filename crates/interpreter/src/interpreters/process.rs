use super::TypeInterpreter;
use crate::config::InterpreterConfig;
use crate::span::{Span, SpanMetadata, SERVICE_INSTANCE_URN, SERVICE_NAME, SERVICE_TYPE};

/// The fallback for typed spans: binds the span to the process that
/// produced it.
#[derive(Debug, Clone)]
pub struct ProcessInterpreter {
    config: InterpreterConfig,
}

impl ProcessInterpreter {
    pub const NAME: &'static str = "process";

    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }
}

impl TypeInterpreter for ProcessInterpreter {
    fn interpret(&self, mut span: Span, meta: &SpanMetadata) -> Span {
        let service_type = match span.meta("language") {
            Some("jvm") => "java",
            _ => "service",
        };
        span.set_meta(SERVICE_TYPE, service_type);

        let service_name = span.meta(SERVICE_NAME).unwrap_or(&span.service).to_string();
        let instance = self
            .config
            .service_instance_urn(&service_name, &meta.hostname, meta.pid, meta.create_time);
        span.set_meta(SERVICE_INSTANCE_URN, instance);
        span.classify_http_error();
        span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SpanMetadata {
        SpanMetadata {
            span_type: "web".into(),
            hostname: "host-1".into(),
            pid: 42,
            create_time: 1700000000,
            kind: None,
        }
    }

    #[test]
    fn binds_to_the_process() {
        let mut span = Span {
            service: "api".into(),
            ..Default::default()
        };
        span.set_meta("language", "jvm");
        let span = ProcessInterpreter::new(InterpreterConfig::default()).interpret(span, &meta());
        assert_eq!(span.meta(SERVICE_TYPE), Some("java"));
        assert_eq!(
            span.meta(SERVICE_INSTANCE_URN),
            Some("urn:service-instance:/api:/host-1:42:1700000000")
        );
    }
}
