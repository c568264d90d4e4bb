//! Where a span came from, as far as interpretation is concerned.

use std::fmt;

use crate::span::Span;

pub const AWS_LAMBDA_LIBRARY: &str = "@opentelemetry/instrumentation-aws-lambda";
pub const AWS_SDK_LIBRARY: &str = "@opentelemetry/instrumentation-aws-sdk";
pub const HTTP_LIBRARY: &str = "@opentelemetry/instrumentation-http";

/// The effective source of a span carrying a `source` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    Traefik,
    OpenTelemetry(OtelSource),
    /// A source no interpreter knows; spans keep their default
    /// interpretation.
    Other(String),
}

/// OpenTelemetry spans refined by instrumentation library and, for the
/// AWS SDK, by the called service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtelSource {
    /// An unrecognized library or AWS service.
    Generic,
    LambdaEntry,
    Lambda,
    Http,
    Sqs,
    Sns,
    S3,
    StepFunctions,
}

impl Source {
    /// Reads the span's `source` tag and refines OpenTelemetry spans.
    pub fn of(span: &Span) -> Option<Source> {
        let source = span.meta("source")?;
        let detected = match source.to_ascii_lowercase().as_str() {
            "traefik" => Source::Traefik,
            "opentelemetry" => Source::OpenTelemetry(OtelSource::of(span)),
            _ => Source::Other(source.to_string()),
        };
        Some(detected)
    }
}

impl OtelSource {
    fn of(span: &Span) -> OtelSource {
        let library = span.meta("instrumentation_library").unwrap_or_default();
        match library {
            AWS_LAMBDA_LIBRARY => OtelSource::LambdaEntry,
            HTTP_LIBRARY => OtelSource::Http,
            AWS_SDK_LIBRARY => {
                let service = span.meta("aws.service.identifier").unwrap_or_default();
                match service {
                    "sqs" => OtelSource::Sqs,
                    "sns" => OtelSource::Sns,
                    "s3" => OtelSource::S3,
                    "lambda" => OtelSource::Lambda,
                    "stepfunctions" => OtelSource::StepFunctions,
                    other => {
                        log::debug!(service = other; "unmapped aws service, keeping generic opentelemetry source");
                        OtelSource::Generic
                    }
                }
            }
            other => {
                log::debug!(library = other; "unknown instrumentation library, keeping generic opentelemetry source");
                OtelSource::Generic
            }
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Traefik => f.write_str("traefik"),
            Source::OpenTelemetry(OtelSource::Generic) => f.write_str("openTelemetry"),
            Source::OpenTelemetry(otel) => write!(f, "openTelemetry{:?}", otel),
            Source::Other(source) => f.write_str(source),
        }
    }
}
