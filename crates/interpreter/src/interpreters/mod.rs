//! Interpreters enrich spans with a normalized service identity.
//!
//! Type interpreters see one span together with its process metadata.
//! Source interpreters see every span of a trace that shares a source and
//! may drop the spans they cannot resolve.

use std::fmt::Debug;

use crate::config::InterpreterConfig;
use crate::error::InterpretError;
use crate::span::{Span, SpanMetadata, SERVICE_NAME, SERVICE_TYPE, SERVICE_URN};

mod otel;
mod process;
mod sql;
mod traefik;

pub use otel::{
    HttpInterpreter, LambdaEntryInterpreter, LambdaInterpreter, S3Interpreter, SnsInterpreter,
    SqsInterpreter, StepFunctionsInterpreter,
};
pub use process::ProcessInterpreter;
pub use sql::SqlInterpreter;
pub use traefik::TraefikInterpreter;

pub trait TypeInterpreter: Debug + Send + Sync {
    fn interpret(&self, span: Span, meta: &SpanMetadata) -> Span;
}

pub trait SourceInterpreter: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn interpret_span(&self, span: Span) -> Result<Span, InterpretError>;

    /// Interprets each span on its own; a span that cannot be resolved is
    /// dropped without affecting the others.
    fn interpret(&self, spans: Vec<Span>) -> Vec<Span> {
        spans
            .into_iter()
            .filter_map(|span| match self.interpret_span(span) {
                Ok(span) => Some(span),
                Err(err) => {
                    log::warn!(interpreter = self.name(); "dropping span: {}", err);
                    None
                }
            })
            .collect()
    }
}

/// Names every span after its service.
#[derive(Debug, Clone)]
pub struct DefaultInterpreter {
    config: InterpreterConfig,
}

impl DefaultInterpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }

    pub fn interpret(&self, mut span: Span) -> Span {
        let urn = self.config.service_urn(&span.service);
        let service = span.service.clone();
        span.set_meta(SERVICE_NAME, service);
        span.set_meta(SERVICE_URN, urn);
        span
    }
}

/// Renames a span's service and re-derives its URN.
pub(crate) fn rename_service(
    config: &InterpreterConfig,
    span: &mut Span,
    service_name: String,
    service_type: &str,
) {
    span.set_meta(SERVICE_URN, config.service_urn(&service_name));
    span.set_meta(SERVICE_NAME, service_name);
    span.set_meta(SERVICE_TYPE, service_type);
}

/// The value of a meta key an interpreter cannot work without.
pub(crate) fn required<'a>(
    span: &'a Span,
    interpreter: &'static str,
    key: &'static str,
) -> Result<&'a str, InterpretError> {
    span.meta(key)
        .filter(|v| !v.is_empty())
        .ok_or(InterpretError::MissingMeta { interpreter, key })
}
