use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use super::{EventMapper, MappedEvent};
use crate::client::{ApiClient, ClusterTypeCache, StaticApiClient};
use crate::config::TopologyConfig;
use crate::kube::Event;
use crate::leader::{self, LeaderElector};
use crate::token::{ResumeCursor, ResumeToken, TokenStore, EVENT_TOKEN_KEY};
use crate::{Error, Result};

const CHECK_NAME: &str = "kubernetes_api_events";

/// One page of events, as returned by a list-from-resource-version call.
#[derive(Debug, Clone, Default)]
pub struct EventList {
    pub items: Vec<Event>,
    /// The resource version of the list itself; empty if unknown.
    pub resource_version: String,
}

/// Lists events newer than a resource version.
pub trait EventWatcher: Debug + Send + Sync {
    fn events<'a>(
        &'a self,
        field_selector: &'a str,
        resource_version: &'a str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<EventList>> + Send + 'a>>;
}

/// Receives mapped events. `commit` is called once per run.
pub trait EventSender: Debug + Send + Sync {
    fn event(&self, event: MappedEvent);
    fn commit(&self) {}
}

#[derive(Debug, Default)]
pub struct MemoryEventSender {
    events: Mutex<Vec<MappedEvent>>,
    commits: Mutex<usize>,
}

impl MemoryEventSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MappedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn commits(&self) -> usize {
        self.commits.lock().map(|c| *c).unwrap_or_default()
    }
}

impl EventSender for MemoryEventSender {
    fn event(&self, event: MappedEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn commit(&self) {
        if let Ok(mut commits) = self.commits.lock() {
            *commits += 1;
        }
    }
}

/// Turns the configured event filters into a field selector: a bare
/// reason becomes `reason!=<reason>`, `k=v` entries are kept as-is.
pub fn convert_filter(filters: &[String]) -> String {
    filters
        .iter()
        .map(|f| {
            if f.contains('=') {
                f.clone()
            } else {
                format!("reason!={}", f)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Periodically lists new cluster events and forwards them, mapped, to a
/// sender. Progress is persisted through the `event` resume token.
#[derive(Debug)]
pub struct EventsCheck {
    config: Arc<TopologyConfig>,
    client: Arc<dyn ApiClient>,
    watcher: Arc<dyn EventWatcher>,
    elector: Arc<dyn LeaderElector>,
    store: Arc<dyn TokenStore>,
    sender: Arc<dyn EventSender>,
    cluster_type: Arc<ClusterTypeCache>,
    cursor: ResumeCursor,
    field_selector: String,
}

impl EventsCheck {
    pub fn new(
        config: Arc<TopologyConfig>,
        client: Arc<dyn ApiClient>,
        watcher: Arc<dyn EventWatcher>,
        elector: Arc<dyn LeaderElector>,
        store: Arc<dyn TokenStore>,
        sender: Arc<dyn EventSender>,
    ) -> Self {
        let field_selector = convert_filter(&config.filtered_event_types);
        Self {
            config,
            client,
            watcher,
            elector,
            store,
            sender,
            cluster_type: Arc::new(ClusterTypeCache::default()),
            cursor: ResumeCursor::new(EVENT_TOKEN_KEY),
            field_selector,
        }
    }

    /// Shares the cluster type detection with other checks.
    pub fn with_cluster_type(mut self, cache: Arc<ClusterTypeCache>) -> Self {
        self.cluster_type = cache;
        self
    }

    pub fn field_selector(&self) -> &str {
        &self.field_selector
    }

    /// Runs once and returns the number of events sent.
    pub async fn run(&self) -> Result<usize> {
        if !self.config.collect_events {
            return Ok(0);
        }
        if !leader::may_run(CHECK_NAME, self.config.skip_leader_election, self.elector.as_ref()).await {
            return Ok(0);
        }

        let cluster_type = self
            .cluster_type
            .get(self.client.as_ref())
            .await
            .map_err(|err| Error::api(CHECK_NAME, err))?;
        let mapper = EventMapper::new(
            cluster_type,
            &self.config.cluster_name,
            self.config.category_overrides(),
        );

        let token = self.cursor.load(self.store.as_ref()).await;
        let since = token
            .as_ref()
            .map(|t| t.resource_version.as_str())
            .unwrap_or_default();
        let limit = self.config.max_events_per_run;

        let listing = self.watcher.events(&self.field_selector, since, limit);
        let list = match tokio::time::timeout(self.config.event_read_timeout, listing).await {
            Ok(list) => list.map_err(|err| Error::api(CHECK_NAME, err))?,
            Err(_) => return Err(Error::Timeout(self.config.event_read_timeout)),
        };

        let truncated = list.items.len() > limit;
        let mut newest = list.resource_version.clone();
        let mut sent = 0;
        for event in list.items.iter().take(limit) {
            if truncated {
                newest = event.metadata.resource_version.clone();
            }
            match mapper.map(event) {
                Ok(mapped) => {
                    self.sender.event(mapped);
                    sent += 1;
                }
                Err(err) => log::info!(check = CHECK_NAME; "skipping event: {}", err),
            }
        }
        self.sender.commit();

        if !newest.is_empty() {
            self.cursor
                .commit(self.store.as_ref(), ResumeToken::new(newest, Utc::now()))
                .await;
        }
        log::debug!(check = CHECK_NAME, sent = sent; "events check finished");
        Ok(sent)
    }
}

// A field selector of the `k=v`/`k!=v` form, restricted to the fields
// the event listing honours.
fn selector_matches(event: &Event, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| {
            let (field, value, negate) = match term.split_once("!=") {
                Some((f, v)) => (f, v, true),
                None => match term.split_once('=') {
                    Some((f, v)) => (f, v.trim_start_matches('='), false),
                    None => return true,
                },
            };
            let actual = match field {
                "reason" => event.reason.as_str(),
                "type" => event.event_type.as_str(),
                "involvedObject.kind" => event.involved_object.kind.as_str(),
                "involvedObject.namespace" => event.involved_object.namespace.as_str(),
                "involvedObject.name" => event.involved_object.name.as_str(),
                _ => return true,
            };
            (actual == value) != negate
        })
}

fn newer_than(event: &Event, resource_version: &str) -> bool {
    match (
        event.metadata.resource_version.parse::<u64>(),
        resource_version.parse::<u64>(),
    ) {
        (Ok(rv), Ok(since)) => rv > since,
        _ => true,
    }
}

impl EventWatcher for StaticApiClient {
    fn events<'a>(
        &'a self,
        field_selector: &'a str,
        resource_version: &'a str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<EventList>> + Send + 'a>> {
        Box::pin(async move {
            let items: Vec<Event> = self
                .state()
                .events
                .iter()
                .filter(|e| resource_version.is_empty() || newer_than(e, resource_version))
                .filter(|e| selector_matches(e, field_selector))
                .take(limit.saturating_add(1))
                .cloned()
                .collect();
            let resource_version = items
                .iter()
                .filter_map(|e| e.metadata.resource_version.parse::<u64>().ok())
                .max()
                .map(|rv| rv.to_string())
                .unwrap_or_else(|| resource_version.to_string());
            Ok(EventList {
                items,
                resource_version,
            })
        })
    }
}
