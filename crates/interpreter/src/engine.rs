use std::collections::HashMap;

use indexmap::IndexMap;

use crate::config::InterpreterConfig;
use crate::interpreters::{
    DefaultInterpreter, HttpInterpreter, LambdaEntryInterpreter, LambdaInterpreter, ProcessInterpreter,
    S3Interpreter, SnsInterpreter, SourceInterpreter, SqlInterpreter, SqsInterpreter,
    StepFunctionsInterpreter, TraefikInterpreter, TypeInterpreter,
};
use crate::source::{OtelSource, Source};
use crate::span::{Span, SpanMetadata};

/// Routes every span of a trace to the interpreters that understand it.
#[derive(Debug)]
pub struct SpanInterpreterEngine {
    default: DefaultInterpreter,
    process: ProcessInterpreter,
    types: HashMap<&'static str, Box<dyn TypeInterpreter>>,
    sources: HashMap<Source, Box<dyn SourceInterpreter>>,
}

impl SpanInterpreterEngine {
    pub fn new(config: InterpreterConfig) -> Self {
        let mut types: HashMap<&'static str, Box<dyn TypeInterpreter>> = HashMap::new();
        types.insert(SqlInterpreter::NAME, Box::new(SqlInterpreter::new(config.clone())));

        let mut sources: HashMap<Source, Box<dyn SourceInterpreter>> = HashMap::new();
        sources.insert(Source::Traefik, Box::new(TraefikInterpreter::new(config.clone())));
        let otel: [(OtelSource, Box<dyn SourceInterpreter>); 7] = [
            (OtelSource::LambdaEntry, Box::new(LambdaEntryInterpreter::new(config.clone()))),
            (OtelSource::Lambda, Box::new(LambdaInterpreter::new(config.clone()))),
            (OtelSource::Http, Box::new(HttpInterpreter::new(config.clone()))),
            (OtelSource::Sqs, Box::new(SqsInterpreter::new(config.clone()))),
            (OtelSource::Sns, Box::new(SnsInterpreter::new(config.clone()))),
            (OtelSource::S3, Box::new(S3Interpreter::new(config.clone()))),
            (OtelSource::StepFunctions, Box::new(StepFunctionsInterpreter::new(config.clone()))),
        ];
        for (source, interpreter) in otel {
            sources.insert(Source::OpenTelemetry(source), interpreter);
        }

        Self {
            default: DefaultInterpreter::new(config.clone()),
            process: ProcessInterpreter::new(config),
            types,
            sources,
        }
    }

    /// Interprets a trace. The input is left untouched.
    ///
    /// Spans that were already interpreted or that nothing more specific
    /// applies to come first, followed by typed spans and finally the spans
    /// of each source in the order the sources were first seen.
    pub fn interpret(&self, trace: &[Span]) -> Vec<Span> {
        let mut plain = Vec::new();
        let mut typed = Vec::new();
        let mut grouped: IndexMap<Source, Vec<Span>> = IndexMap::new();

        for span in trace {
            if span.is_interpreted() {
                plain.push(span.clone());
                continue;
            }
            let span = self.default.interpret(span.clone());

            if let Some(meta) = SpanMetadata::extract(&span) {
                typed.push(self.type_interpreter(&meta).interpret(span, &meta));
            } else if let Some(source) = Source::of(&span) {
                grouped.entry(source).or_default().push(span);
            } else {
                let mut span = span;
                span.classify_http_error();
                plain.push(span);
            }
        }

        let mut out = plain;
        out.append(&mut typed);
        for (source, spans) in grouped {
            match self.sources.get(&source) {
                Some(interpreter) => out.extend(interpreter.interpret(spans)),
                None => {
                    let source = source.to_string();
                    log::debug!(source = source.as_str(); "no interpreter for source, keeping default interpretation");
                    out.extend(spans.into_iter().map(|mut span| {
                        span.classify_http_error();
                        span
                    }));
                }
            }
        }
        out
    }

    fn type_interpreter(&self, meta: &SpanMetadata) -> &dyn TypeInterpreter {
        match self.types.get(meta.span_type.as_str()) {
            Some(interpreter) => interpreter.as_ref(),
            None => &self.process,
        }
    }
}

impl Default for SpanInterpreterEngine {
    fn default() -> Self {
        Self::new(InterpreterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::source::AWS_SDK_LIBRARY;
    use crate::span::{ERROR_CLASS, HTTP_STATUS_CODE, SERVICE_IDENTIFIERS, SERVICE_INSTANCE_URN, SERVICE_NAME, SERVICE_TYPE, SERVICE_URN, SPAN_KIND};

    fn span(id: u64, service: &str, meta: &[(&str, &str)]) -> Span {
        Span {
            span_id: id,
            service: service.into(),
            meta: meta.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Default::default()
        }
    }

    fn typed(id: u64, service: &str, span_type: &str) -> Span {
        let mut span = span(
            id,
            service,
            &[("span.hostname", "host-1"), ("span.pid", "7"), ("span.starttime", "100")],
        );
        span.span_type = span_type.into();
        span
    }

    fn ids(spans: &[Span]) -> Vec<u64> {
        spans.iter().map(|s| s.span_id).collect()
    }

    #[test]
    fn routes_opentelemetry_s3_spans() {
        let input = span(
            1,
            "handler",
            &[
                ("source", "opentelemetry"),
                ("instrumentation_library", AWS_SDK_LIBRARY),
                ("aws.service.identifier", "s3"),
                ("aws.request.bucket", "my-bucket"),
            ],
        );
        let out = SpanInterpreterEngine::default().interpret(&[input]);

        assert_eq!(out.len(), 1);
        let span = &out[0];
        assert_eq!(span.service, "aws.s3");
        assert_eq!(span.resource, "aws.s3");
        assert_eq!(span.span_type, "aws");
        assert_eq!(span.meta(SERVICE_URN), Some("urn:service:/arn:aws:s3:::my-bucket"));
        assert_eq!(span.meta(SERVICE_IDENTIFIERS), Some("arn:aws:s3:::my-bucket"));
        assert_eq!(span.meta(SPAN_KIND), Some("consumer"));
    }

    #[test]
    fn groups_come_after_typed_and_plain_spans() {
        let trace = vec![
            span(1, "proxy", &[("source", "traefik"), ("http.host", "shop")]),
            typed(2, "orders", "sql"),
            span(3, "plain", &[]),
            typed(4, "api", "web"),
            span(5, "proxy", &[("source", "traefik")]),
            span(6, "done", &[(SERVICE_URN, "urn:service:/done")]),
        ];
        let out = SpanInterpreterEngine::default().interpret(&trace);
        assert_eq!(ids(&out), vec![3, 6, 2, 4, 1, 5]);

        assert_eq!(out[0].meta(SERVICE_URN), Some("urn:service:/plain"));
        assert_eq!(out[2].meta(SERVICE_TYPE), Some("database"));
        assert_eq!(
            out[3].meta(SERVICE_INSTANCE_URN),
            Some("urn:service-instance:/api:/host-1:7:100")
        );
        assert_eq!(out[4].meta(SERVICE_NAME), Some("shop"));
        assert_eq!(out[5].meta(SERVICE_NAME), Some("proxy"));
    }

    #[test]
    fn unresolvable_spans_are_dropped() {
        let trace = vec![
            span(
                1,
                "handler",
                &[
                    ("source", "openTelemetry"),
                    ("instrumentation_library", AWS_SDK_LIBRARY),
                    ("aws.service.identifier", "sqs"),
                    ("aws.region", "eu-west-1"),
                ],
            ),
            span(2, "plain", &[]),
        ];
        let out = SpanInterpreterEngine::default().interpret(&trace);
        assert_eq!(ids(&out), vec![2]);
    }

    #[test]
    fn unknown_sources_keep_the_default_interpretation() {
        let trace = vec![
            span(1, "mesh", &[("source", "istio")]),
            span(
                2,
                "handler",
                &[
                    ("source", "opentelemetry"),
                    ("instrumentation_library", AWS_SDK_LIBRARY),
                    ("aws.service.identifier", "dynamodb"),
                ],
            ),
        ];
        let out = SpanInterpreterEngine::default().interpret(&trace);
        assert_eq!(ids(&out), vec![1, 2]);
        assert_eq!(out[0].meta(SERVICE_URN), Some("urn:service:/mesh"));
        assert_eq!(out[1].meta(SERVICE_URN), Some("urn:service:/handler"));
    }

    fn routed(route: &str) -> Span {
        match route {
            "sql" | "web" => typed(1, "svc", route),
            "traefik" => span(1, "proxy", &[("source", "traefik")]),
            "istio" => span(1, "mesh", &[("source", "istio")]),
            "s3" => span(
                1,
                "handler",
                &[
                    ("source", "opentelemetry"),
                    ("instrumentation_library", AWS_SDK_LIBRARY),
                    ("aws.service.identifier", "s3"),
                    ("aws.request.bucket", "b"),
                ],
            ),
            _ => span(1, "plain", &[]),
        }
    }

    #[test]
    fn errored_sql_and_plain_spans_are_classified() {
        let mut sql = typed(1, "orders", "sql");
        sql.error = 1;
        sql.metrics.insert(HTTP_STATUS_CODE.into(), 503.0);
        let mut plain = span(2, "plain", &[]);
        plain.error = 1;
        plain.metrics.insert(HTTP_STATUS_CODE.into(), 404.0);

        let out = SpanInterpreterEngine::default().interpret(&[sql, plain]);
        assert_eq!(ids(&out), vec![2, 1]);
        assert_eq!(out[0].meta(ERROR_CLASS), Some("4xx"));
        assert_eq!(out[1].meta(ERROR_CLASS), Some("5xx"));
    }

    proptest! {
        #[test]
        fn http_errors_are_classified_on_every_route(
            route in prop::sample::select(vec!["plain", "sql", "web", "traefik", "istio", "s3"]),
            status in 100u16..600,
        ) {
            let mut input = routed(route);
            input.error = 1;
            input.metrics.insert(HTTP_STATUS_CODE.into(), status as f64);

            let out = SpanInterpreterEngine::default().interpret(&[input]);
            prop_assert_eq!(out.len(), 1);
            let expected = match status {
                400..=499 => Some("4xx"),
                500..=599 => Some("5xx"),
                _ => None,
            };
            prop_assert_eq!(out[0].meta(ERROR_CLASS), expected);
        }

        #[test]
        fn interpreted_spans_pass_through(
            service in "[a-z]{1,8}",
            urn in "urn:service:/[a-z]{1,8}",
            source in prop::sample::select(vec!["traefik", "opentelemetry", "istio"]),
            span_type in prop::sample::select(vec!["", "sql", "web"]),
        ) {
            let mut input = span(9, &service, &[(SERVICE_URN, urn.as_str()), ("source", source)]);
            input.span_type = span_type.to_string();
            let out = SpanInterpreterEngine::default().interpret(std::slice::from_ref(&input));
            prop_assert_eq!(out, vec![input]);
        }
    }
}
