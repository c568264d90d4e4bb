//! Span interpretation: gives every span of a trace a normalized service
//! identity.
//!
//! Spans are resolved in layers. A default interpreter names each span
//! after its service; spans carrying process metadata are refined by a type
//! interpreter and spans tagged with a `source` are handed, grouped, to the
//! interpreter for that source. Spans that already carry a service URN are
//! left alone.
//!
//! ```
//! use clusteragent_interpreter::{Span, SpanInterpreterEngine, SERVICE_URN};
//!
//! let engine = SpanInterpreterEngine::default();
//! let spans = engine.interpret(&[Span {
//!     service: "billing".into(),
//!     ..Default::default()
//! }]);
//! assert_eq!(spans[0].meta(SERVICE_URN), Some("urn:service:/billing"));
//! ```

pub mod config;
pub mod engine;
mod error;
pub mod interpreters;
pub mod source;
pub mod span;

pub use config::InterpreterConfig;
pub use engine::SpanInterpreterEngine;
pub use error::InterpretError;
pub use source::{OtelSource, Source};
pub use span::{
    Span, SpanMetadata, Trace, ERROR_CLASS, SERVICE_IDENTIFIERS, SERVICE_INSTANCE_URN, SERVICE_NAME,
    SERVICE_TYPE, SERVICE_URN, SPAN_KIND,
};
