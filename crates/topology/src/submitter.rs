//! Serializes snapshot lifecycle markers and topology items to a sink.

use std::fmt;
use std::fmt::Debug;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde::Serialize;

use crate::model::{Component, Instance, Relation};

/// A record of the emitted stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Start {
        check_id: String,
        instance: Instance,
    },
    Component {
        check_id: String,
        instance: Instance,
        component: Component,
    },
    Relation {
        check_id: String,
        instance: Instance,
        relation: Relation,
    },
    Stop {
        check_id: String,
        instance: Instance,
    },
    Complete {
        check_id: String,
    },
    Error {
        check_id: String,
        message: String,
    },
}

impl Record {
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Start { .. } => "start",
            Record::Component { .. } => "component",
            Record::Relation { .. } => "relation",
            Record::Stop { .. } => "stop",
            Record::Complete { .. } => "complete",
            Record::Error { .. } => "error",
        }
    }
}

/// The external receiver of the record stream.
pub trait Sink: Debug + Send + Sync {
    fn send(
        &self,
        records: Vec<Record>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

const DEFAULT_BATCH_SIZE: usize = 500;

/// The sole writer to the sink for one check.
///
/// Items are buffered and flushed in order, either when the buffer fills
/// up or at `stop_snapshot`/`complete`. The sink sees at most one batch
/// at a time.
#[derive(Debug)]
pub struct Submitter {
    check_id: String,
    instance: Instance,
    sink: Arc<dyn Sink>,
    batch_size: usize,
    state: tokio::sync::Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    in_snapshot: bool,
    buffer: Vec<Record>,
}

impl Submitter {
    pub fn new(check_id: impl Into<String>, instance: Instance, sink: Arc<dyn Sink>) -> Self {
        Self {
            check_id: check_id.into(),
            instance,
            sink,
            batch_size: DEFAULT_BATCH_SIZE,
            state: tokio::sync::Mutex::new(State::default()),
        }
    }

    #[cfg(test)]
    fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Opens a snapshot. Calling it again before `stop_snapshot` is a no-op.
    pub async fn start_snapshot(&self) {
        let mut state = self.state.lock().await;
        if state.in_snapshot {
            return;
        }
        state.in_snapshot = true;
        state.buffer.push(Record::Start {
            check_id: self.check_id.clone(),
            instance: self.instance.clone(),
        });
    }

    pub async fn submit_component(&self, component: Component) {
        let record = Record::Component {
            check_id: self.check_id.clone(),
            instance: self.instance.clone(),
            component,
        };
        self.push_item(record).await;
    }

    pub async fn submit_relation(&self, relation: Relation) {
        let record = Record::Relation {
            check_id: self.check_id.clone(),
            instance: self.instance.clone(),
            relation,
        };
        self.push_item(record).await;
    }

    async fn push_item(&self, record: Record) {
        let mut state = self.state.lock().await;
        if !state.in_snapshot {
            log::warn!(check = self.check_id.as_str(); "dropping {} submitted outside of a snapshot", record.kind());
            return;
        }
        state.buffer.push(record);
        if state.buffer.len() >= self.batch_size {
            self.flush_locked(&mut state).await;
        }
    }

    /// Closes the snapshot; no further items are accepted until the next start.
    pub async fn stop_snapshot(&self) {
        let mut state = self.state.lock().await;
        if !state.in_snapshot {
            return;
        }
        state.in_snapshot = false;
        state.buffer.push(Record::Stop {
            check_id: self.check_id.clone(),
            instance: self.instance.clone(),
        });
        self.flush_locked(&mut state).await;
    }

    /// Signals the end of a run and flushes everything buffered.
    pub async fn complete(&self) {
        let mut state = self.state.lock().await;
        state.buffer.push(Record::Complete {
            check_id: self.check_id.clone(),
        });
        self.flush_locked(&mut state).await;
    }

    /// Records a per-run error. The snapshot carries on.
    pub async fn handle_error(&self, err: &crate::Error) {
        log::warn!(check = self.check_id.as_str(); "{}", err);
        let mut state = self.state.lock().await;
        state.buffer.push(Record::Error {
            check_id: self.check_id.clone(),
            message: err.to_string(),
        });
    }

    async fn flush_locked(&self, state: &mut State) {
        if state.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut state.buffer);
        let count = batch.len();
        if let Err(err) = self.sink.send(batch).await {
            log::warn!(check = self.check_id.as_str(), records = count; "sink rejected batch: {:#}", err);
        }
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.records().iter().map(Record::kind).collect()
    }

    pub fn components(&self) -> Vec<Component> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::Component { component, .. } => Some(component),
                _ => None,
            })
            .collect()
    }

    pub fn relations(&self) -> Vec<Relation> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::Relation { relation, .. } => Some(relation),
                _ => None,
            })
            .collect()
    }
}

impl Sink for MemorySink {
    fn send(
        &self,
        records: Vec<Record>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let res = self
            .records
            .lock()
            .map(|mut r| r.extend(records))
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"));
        Box::pin(async move { res })
    }
}

/// Writes each record as one JSON line.
pub struct JsonLinesSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn write_all(&self, records: &[Record]) -> anyhow::Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow::anyhow!("output poisoned"))?;
        for record in records {
            let line = serde_json::to_string(record).context("serialize record")?;
            writeln!(out, "{}", line).context("write record")?;
        }
        out.flush().context("flush records")
    }
}

impl fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

impl Sink for JsonLinesSink {
    fn send(
        &self,
        records: Vec<Record>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let res = self.write_all(&records);
        Box::pin(async move { res })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RelationType;

    fn submitter(sink: Arc<MemorySink>) -> Submitter {
        Submitter::new(
            "kubernetes_topology",
            Instance::new("kubernetes", "mycluster"),
            sink,
        )
    }

    #[tokio::test]
    async fn lifecycle_is_ordered() {
        let sink = Arc::new(MemorySink::new());
        let sub = submitter(sink.clone());

        sub.start_snapshot().await;
        sub.start_snapshot().await;
        sub.submit_component(Component::new("a", "pod")).await;
        sub.submit_relation(Relation::new("a", "b", RelationType::Owns))
            .await;
        sub.stop_snapshot().await;
        sub.submit_component(Component::new("late", "pod")).await;
        sub.complete().await;

        assert_eq!(
            sink.kinds(),
            vec!["start", "component", "relation", "stop", "complete"]
        );
    }

    #[tokio::test]
    async fn errors_are_forwarded_inside_the_snapshot() {
        let sink = Arc::new(MemorySink::new());
        let sub = submitter(sink.clone());

        sub.start_snapshot().await;
        sub.handle_error(&crate::Error::MissingInternalIp("n1".into()))
            .await;
        sub.stop_snapshot().await;
        sub.complete().await;

        assert_eq!(sink.kinds(), vec!["start", "error", "stop", "complete"]);
        let messages: Vec<String> = sink
            .records()
            .into_iter()
            .filter_map(|r| match r {
                Record::Error { message, .. } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(messages, vec!["node n1 has no internal ip, host binding skipped"]);
    }

    #[tokio::test]
    async fn small_batches_keep_order() {
        let sink = Arc::new(MemorySink::new());
        let sub = submitter(sink.clone()).with_batch_size(2);

        sub.start_snapshot().await;
        for i in 0..5 {
            sub.submit_component(Component::new(format!("c{}", i), "pod"))
                .await;
        }
        sub.stop_snapshot().await;
        sub.complete().await;

        let ids: Vec<_> = sink
            .components()
            .into_iter()
            .map(|c| c.external_id)
            .collect();
        assert_eq!(ids, vec!["c0", "c1", "c2", "c3", "c4"]);
        assert_eq!(sink.kinds().first(), Some(&"start"));
        assert_eq!(sink.kinds().last(), Some(&"complete"));
    }

    #[test]
    fn records_serialize_with_kind_tags() {
        let record = Record::Stop {
            check_id: "c".into(),
            instance: Instance::new("kubernetes", "mycluster"),
        };
        insta::assert_debug_snapshot!(serde_json::to_string(&record).unwrap(), @r###""{\"kind\":\"stop\",\"check_id\":\"c\",\"instance\":{\"type\":\"kubernetes\",\"url\":\"mycluster\"}}""###);
    }
}
