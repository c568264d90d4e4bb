use std::fmt;
use std::io::Write;
use std::sync::Mutex;

use anyhow::Context;
use clusteragent_topology::events::{EventSender, MappedEvent};
use serde::Serialize;

#[derive(Serialize)]
struct EventLine<'a> {
    kind: &'static str,
    event: &'a MappedEvent,
}

/// Writes mapped events as JSON lines next to the topology records.
pub struct JsonLinesEventSender {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesEventSender {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn write(&self, event: &MappedEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(&EventLine { kind: "event", event }).context("serialize event")?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow::anyhow!("output poisoned"))?;
        writeln!(out, "{}", line).context("write event")
    }
}

impl fmt::Debug for JsonLinesEventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesEventSender").finish_non_exhaustive()
    }
}

impl EventSender for JsonLinesEventSender {
    fn event(&self, event: MappedEvent) {
        if let Err(err) = self.write(&event) {
            log::warn!("could not write event: {:#}", err);
        }
    }

    fn commit(&self) {
        if let Ok(mut out) = self.out.lock() {
            if let Err(err) = out.flush() {
                log::warn!("could not flush events: {}", err);
            }
        }
    }
}
