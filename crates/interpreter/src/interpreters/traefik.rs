use super::{rename_service, SourceInterpreter};
use crate::config::InterpreterConfig;
use crate::error::InterpretError;
use crate::span::Span;

/// Spans from the traefik proxy are named after the host they routed.
#[derive(Debug, Clone)]
pub struct TraefikInterpreter {
    config: InterpreterConfig,
}

impl TraefikInterpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }
}

impl SourceInterpreter for TraefikInterpreter {
    fn name(&self) -> &'static str {
        "traefik"
    }

    fn interpret_span(&self, mut span: Span) -> Result<Span, InterpretError> {
        let service_name = match span.meta("http.host") {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => span.service.clone(),
        };
        rename_service(&self.config, &mut span, service_name, "traefik");
        span.classify_http_error();
        Ok(span)
    }
}
