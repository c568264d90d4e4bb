//! OpenTelemetry spans for AWS Lambda functions and the services they call.
//!
//! Every interpreter resolves the canonical identifier of the remote
//! resource and hands it to [`OtelSpan`], which rewrites the span in the
//! shape shared by the whole family.

use url::Url;

use super::{required, SourceInterpreter};
use crate::config::InterpreterConfig;
use crate::error::InterpretError;
use crate::span::{Span, SERVICE_IDENTIFIERS, SERVICE_NAME, SERVICE_TYPE, SERVICE_URN, SPAN_KIND};

const ORIGIN: &str = "open-telemetry";

/// The resolved identity of the resource an OpenTelemetry span describes.
struct OtelSpan<'a> {
    service_name: String,
    name_prefix: &'a str,
    /// Suffix of the `aws.` service name.
    service: &'a str,
    kind: &'a str,
    arn: String,
}

impl OtelSpan<'_> {
    fn apply(self, config: &InterpreterConfig, mut span: Span) -> Span {
        let service = format!("aws.{}", self.service);
        span.name = format!("{}: {}", self.name_prefix, self.service_name);
        span.resource = service.clone();
        span.service = service.clone();
        span.span_type = "aws".into();

        span.set_meta("service", service);
        span.set_meta(SERVICE_NAME, self.service_name);
        span.set_meta(SERVICE_TYPE, ORIGIN);
        span.set_meta("sts.origin", ORIGIN);
        span.set_meta(SPAN_KIND, self.kind);
        span.set_meta(SERVICE_URN, config.service_urn(&self.arn));
        span.set_meta(SERVICE_IDENTIFIERS, self.arn);
        span.classify_http_error();
        span
    }
}

/// The segment at `index` of a colon separated ARN.
fn arn_part<'a>(interpreter: &'static str, arn: &'a str, index: usize) -> Result<&'a str, InterpretError> {
    arn.split(':')
        .nth(index)
        .filter(|part| !part.is_empty())
        .ok_or_else(|| InterpretError::InvalidArn {
            interpreter,
            arn: arn.to_string(),
        })
}

/// The root span of a Lambda invocation.
#[derive(Debug, Clone)]
pub struct LambdaEntryInterpreter {
    config: InterpreterConfig,
}

impl LambdaEntryInterpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }
}

impl SourceInterpreter for LambdaEntryInterpreter {
    fn name(&self) -> &'static str {
        "lambda-entry"
    }

    fn interpret_span(&self, span: Span) -> Result<Span, InterpretError> {
        let arn = required(&span, self.name(), "faas.id")?.to_lowercase();
        required(&span, self.name(), "cloud.account.id")?;
        let function = arn_part(self.name(), &arn, 6)?.to_string();

        Ok(OtelSpan {
            service_name: function,
            name_prefix: "Lambda",
            service: "lambda",
            kind: "server",
            arn,
        }
        .apply(&self.config, span))
    }
}

/// A Lambda function invoked through the AWS SDK.
#[derive(Debug, Clone)]
pub struct LambdaInterpreter {
    config: InterpreterConfig,
}

impl LambdaInterpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }
}

impl SourceInterpreter for LambdaInterpreter {
    fn name(&self) -> &'static str {
        "lambda"
    }

    fn interpret_span(&self, span: Span) -> Result<Span, InterpretError> {
        let operation = required(&span, self.name(), "aws.operation")?;
        if !operation.eq_ignore_ascii_case("invoke") {
            return Err(InterpretError::UnsupportedOperation {
                interpreter: self.name(),
                operation: operation.to_string(),
            });
        }
        let function = required(&span, self.name(), "aws.request.function.name")?.to_string();
        let account = required(&span, self.name(), "aws.account.id")?;
        let region = required(&span, self.name(), "aws.region")?;
        let arn = format!("arn:aws:lambda:{region}:{account}:function:{function}").to_lowercase();

        Ok(OtelSpan {
            service_name: function,
            name_prefix: "Lambda",
            service: "lambda",
            kind: "consumer",
            arn,
        }
        .apply(&self.config, span))
    }
}

#[derive(Debug, Clone)]
pub struct SqsInterpreter {
    config: InterpreterConfig,
}

impl SqsInterpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }
}

impl SourceInterpreter for SqsInterpreter {
    fn name(&self) -> &'static str {
        "sqs"
    }

    fn interpret_span(&self, span: Span) -> Result<Span, InterpretError> {
        let region = required(&span, self.name(), "aws.region")?;
        let endpoint = required(&span, self.name(), "messaging.url")?;
        let queue = required(&span, self.name(), "messaging.destination")?;

        // https://sqs.<region>.amazonaws.com/<account>/<queue>
        let invalid = || InterpretError::InvalidUrl {
            interpreter: "sqs",
            url: endpoint.to_string(),
        };
        let url = Url::parse(endpoint).map_err(|_| invalid())?;
        let account = url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|account| !account.is_empty())
            .ok_or_else(invalid)?;

        let arn = format!("https://{region}.queue.amazonaws.com/{account}/{queue}").to_lowercase();
        let service_name = format!("{queue}-{account}-{region}");
        Ok(OtelSpan {
            service_name,
            name_prefix: "SQS Queue",
            service: "sqs.queue",
            kind: "consumer",
            arn,
        }
        .apply(&self.config, span))
    }
}

#[derive(Debug, Clone)]
pub struct SnsInterpreter {
    config: InterpreterConfig,
}

impl SnsInterpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }
}

impl SourceInterpreter for SnsInterpreter {
    fn name(&self) -> &'static str {
        "sns"
    }

    fn interpret_span(&self, span: Span) -> Result<Span, InterpretError> {
        let arn = required(&span, self.name(), "aws.request.topic.arn")?.to_lowercase();
        // arn:aws:sns:<region>:<account>:<topic>
        let topic = arn_part(self.name(), &arn, 5)?.to_string();

        Ok(OtelSpan {
            service_name: topic,
            name_prefix: "SNS Topic",
            service: "sns.topic",
            kind: "consumer",
            arn,
        }
        .apply(&self.config, span))
    }
}

#[derive(Debug, Clone)]
pub struct S3Interpreter {
    config: InterpreterConfig,
}

impl S3Interpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }
}

impl SourceInterpreter for S3Interpreter {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn interpret_span(&self, span: Span) -> Result<Span, InterpretError> {
        let bucket = required(&span, self.name(), "aws.request.bucket")?.to_string();
        let arn = format!("arn:aws:s3:::{bucket}").to_lowercase();

        Ok(OtelSpan {
            service_name: bucket,
            name_prefix: "S3 Bucket",
            service: "s3",
            kind: "consumer",
            arn,
        }
        .apply(&self.config, span))
    }
}

#[derive(Debug, Clone)]
pub struct StepFunctionsInterpreter {
    config: InterpreterConfig,
}

impl StepFunctionsInterpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }
}

impl SourceInterpreter for StepFunctionsInterpreter {
    fn name(&self) -> &'static str {
        "stepfunctions"
    }

    fn interpret_span(&self, span: Span) -> Result<Span, InterpretError> {
        let arn = required(&span, self.name(), "aws.request.state.machine.arn")?.to_lowercase();
        // arn:aws:states:<region>:<account>:stateMachine:<name>
        let machine = arn_part(self.name(), &arn, 6)?.to_string();

        Ok(OtelSpan {
            service_name: machine,
            name_prefix: "State Machine",
            service: "stepfunctions",
            kind: "consumer",
            arn,
        }
        .apply(&self.config, span))
    }
}

/// Outgoing HTTP requests made from inside a Lambda function.
#[derive(Debug, Clone)]
pub struct HttpInterpreter {
    config: InterpreterConfig,
}

impl HttpInterpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }
}

/// Lowercased `host/path` of a URL, without scheme, query or fragment.
pub(crate) fn sanitize_url(url: &str) -> String {
    let url = url.to_lowercase();
    let url = url.split('#').next().unwrap_or_default();
    let url = url.split('?').next().unwrap_or_default();
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
        .to_string()
}

impl SourceInterpreter for HttpInterpreter {
    fn name(&self) -> &'static str {
        "http"
    }

    fn interpret_span(&self, span: Span) -> Result<Span, InterpretError> {
        let url = required(&span, self.name(), "http.url")?;
        let method = required(&span, self.name(), "http.method")?.to_uppercase();
        if Url::parse(url).is_err() {
            return Err(InterpretError::InvalidUrl {
                interpreter: self.name(),
                url: url.to_string(),
            });
        }
        let target = sanitize_url(url);

        Ok(OtelSpan {
            service_name: format!("{method} {target}"),
            name_prefix: "HTTP",
            service: "http",
            kind: "producer",
            arn: target,
        }
        .apply(&self.config, span))
    }
}
