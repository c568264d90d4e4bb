pub mod config;
pub mod output;
pub mod scheduler;

use std::path::Path;

use anyhow::{Context, Result};
use clusteragent_interpreter::{InterpreterConfig, SpanInterpreterEngine, Trace};

/// Interprets every trace in a JSON array of traces.
pub fn interpret_file(path: &Path, config: InterpreterConfig) -> Result<Vec<Trace>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read traces {}", path.display()))?;
    let traces: Vec<Trace> = serde_json::from_str(&contents).context("parse traces")?;
    let engine = SpanInterpreterEngine::new(config);
    Ok(traces.iter().map(|trace| engine.interpret(trace)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusteragent_interpreter::SERVICE_URN;

    #[test]
    fn interprets_a_trace_file() {
        let path = std::env::temp_dir().join(format!("cluster-agent-traces-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[[{"service": "api", "span_id": 1}, {"service": "db", "span_id": 2, "meta": {"span.serviceURN": "urn:service:/db"}}]]"#,
        )
        .unwrap();

        let traces = interpret_file(&path, InterpreterConfig::default()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0][0].meta(SERVICE_URN), Some("urn:service:/api"));
        assert_eq!(traces[0][1].meta(SERVICE_URN), Some("urn:service:/db"));
    }
}
