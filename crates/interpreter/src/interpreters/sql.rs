use super::{rename_service, TypeInterpreter};
use crate::config::InterpreterConfig;
use crate::span::{Span, SpanMetadata};

const DATABASE: &str = "database";

/// Turns a database client span into a span of the database itself.
#[derive(Debug, Clone)]
pub struct SqlInterpreter {
    config: InterpreterConfig,
}

impl SqlInterpreter {
    pub const NAME: &'static str = "sql";

    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }
}

impl TypeInterpreter for SqlInterpreter {
    fn interpret(&self, mut span: Span, _meta: &SpanMetadata) -> Span {
        let service_name = match span.meta("db.instance") {
            Some(instance) if !instance.is_empty() => format!("{}:{}", span.service, instance),
            _ => span.service.clone(),
        };
        let db_type = span.meta("db.type").unwrap_or(DATABASE).to_string();
        rename_service(&self.config, &mut span, service_name, &db_type);
        span.classify_http_error();
        span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{SERVICE_NAME, SERVICE_TYPE, SERVICE_URN};

    fn meta() -> SpanMetadata {
        SpanMetadata {
            span_type: "sql".into(),
            hostname: "h".into(),
            pid: 1,
            create_time: 1,
            kind: None,
        }
    }

    #[test]
    fn names_the_database_instance() {
        let mut span = Span {
            service: "orders".into(),
            ..Default::default()
        };
        span.set_meta("db.instance", "orders_db");
        span.set_meta("db.type", "postgresql");
        let span = SqlInterpreter::new(InterpreterConfig::default()).interpret(span, &meta());
        assert_eq!(span.meta(SERVICE_NAME), Some("orders:orders_db"));
        assert_eq!(span.meta(SERVICE_TYPE), Some("postgresql"));
        assert_eq!(span.meta(SERVICE_URN), Some("urn:service:/orders:orders_db"));
    }

    #[test]
    fn untyped_databases() {
        let span = Span {
            service: "cache".into(),
            ..Default::default()
        };
        let span = SqlInterpreter::new(InterpreterConfig::default()).interpret(span, &meta());
        assert_eq!(span.meta(SERVICE_NAME), Some("cache"));
        assert_eq!(span.meta(SERVICE_TYPE), Some("database"));
    }
}
