//! Resume tokens: persistent cursors into the API server's watch streams.
//!
//! The store itself is an external, cluster-held key/value record. Values
//! are encoded as `<resource_version>|<rfc3339 last_time>`.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

pub const EVENT_TOKEN_KEY: &str = "event";
pub const POD_EVENT_TOKEN_KEY: &str = "pod-event";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeToken {
    pub resource_version: String,
    pub last_time: DateTime<Utc>,
}

impl ResumeToken {
    pub fn new(resource_version: impl Into<String>, last_time: DateTime<Utc>) -> Self {
        Self {
            resource_version: resource_version.into(),
            last_time,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}|{}", self.resource_version, self.last_time.to_rfc3339())
    }

    pub fn decode(value: &str) -> anyhow::Result<Self> {
        let (resource_version, last_time) = value
            .split_once('|')
            .with_context(|| format!("malformed resume token {:?}", value))?;
        let last_time = DateTime::parse_from_rfc3339(last_time)
            .with_context(|| format!("malformed resume token time {:?}", last_time))?
            .with_timezone(&Utc);
        Ok(Self::new(resource_version, last_time))
    }
}

/// A strongly consistent key/value record holding resume tokens.
pub trait TokenStore: Debug + Send + Sync {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ResumeToken>>> + Send + 'a>>;

    fn put<'a>(
        &'a self,
        key: &'a str,
        token: ResumeToken,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

/// An in-process token store holding encoded values.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: DashMap<String, String>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every stored token, as if the backing record was deleted.
    pub fn wipe(&self) {
        self.values.clear();
    }
}

impl TokenStore for MemoryTokenStore {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ResumeToken>>> + Send + 'a>> {
        let value = self.values.get(key).map(|v| v.value().clone());
        Box::pin(async move {
            match value {
                Some(v) if !v.is_empty() => Ok(Some(ResumeToken::decode(&v)?)),
                _ => Ok(None),
            }
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        token: ResumeToken,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        self.values.insert(key.to_string(), token.encode());
        Box::pin(async { Ok(()) })
    }
}

/// Tracks one stream's resume token across runs, remembering the last
/// value this process saw so a wiped store does not reset the stream.
#[derive(Debug)]
pub struct ResumeCursor {
    key: &'static str,
    last_known: Mutex<Option<ResumeToken>>,
}

impl ResumeCursor {
    pub fn new(key: &'static str) -> Self {
        Self {
            key,
            last_known: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    fn remembered(&self) -> Option<ResumeToken> {
        self.last_known.lock().ok().and_then(|g| g.clone())
    }

    /// Loads the token to resume from.
    ///
    /// An empty stored resource version yields to the in-process value when
    /// that one is set. A failing store falls back to the in-process value.
    pub async fn load(&self, store: &dyn TokenStore) -> Option<ResumeToken> {
        let stored = match store.get(self.key).await {
            Ok(stored) => stored,
            Err(err) => {
                log::warn!(key = self.key; "could not read resume token, using in-process value: {:#}", err);
                return self.remembered();
            }
        };

        let stored_empty = stored
            .as_ref()
            .map_or(true, |t| t.resource_version.is_empty());
        match self.remembered() {
            Some(mem) if stored_empty && !mem.resource_version.is_empty() => {
                log::error!(
                    key = self.key, resource_version = mem.resource_version.as_str();
                    "stored resume token is empty, recovering from in-process value"
                );
                Some(mem)
            }
            _ => stored,
        }
    }

    /// Records the token in-process and writes it to the store.
    /// A failed write is logged and otherwise ignored.
    pub async fn commit(&self, store: &dyn TokenStore, token: ResumeToken) {
        if let Ok(mut guard) = self.last_known.lock() {
            *guard = Some(token.clone());
        }
        if let Err(err) = store.put(self.key, token).await {
            log::warn!(key = self.key; "could not write resume token: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug)]
    struct BrokenStore;

    impl TokenStore for BrokenStore {
        fn get<'a>(
            &'a self,
            _key: &'a str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ResumeToken>>> + Send + 'a>>
        {
            Box::pin(async { anyhow::bail!("configmap unavailable") })
        }

        fn put<'a>(
            &'a self,
            _key: &'a str,
            _token: ResumeToken,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
            Box::pin(async { anyhow::bail!("configmap unavailable") })
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap()
    }

    #[test]
    fn token_encoding() {
        let token = ResumeToken::new("12345", t0());
        assert_eq!(token.encode(), "12345|2023-11-14T22:13:20+00:00");
        assert_eq!(ResumeToken::decode(&token.encode()).unwrap(), token);
        assert!(ResumeToken::decode("12345").is_err());
        assert!(ResumeToken::decode("12345|yesterday").is_err());
    }

    #[tokio::test]
    async fn stored_value_is_used() {
        let store = MemoryTokenStore::new();
        store
            .put(EVENT_TOKEN_KEY, ResumeToken::new("10", t0()))
            .await
            .unwrap();
        let cursor = ResumeCursor::new(EVENT_TOKEN_KEY);
        assert_eq!(cursor.load(&store).await.unwrap().resource_version, "10");
    }

    #[tokio::test]
    async fn in_process_value_wins_after_wipe() {
        let store = MemoryTokenStore::new();
        let cursor = ResumeCursor::new(EVENT_TOKEN_KEY);
        assert_eq!(cursor.load(&store).await, None);

        cursor.commit(&store, ResumeToken::new("42", t0())).await;
        store.wipe();
        assert_eq!(cursor.load(&store).await.unwrap().resource_version, "42");

        store
            .put(EVENT_TOKEN_KEY, ResumeToken::new("", t0()))
            .await
            .unwrap();
        assert_eq!(cursor.load(&store).await.unwrap().resource_version, "42");
    }

    #[tokio::test]
    async fn broken_store_does_not_fail_the_run() {
        let cursor = ResumeCursor::new(POD_EVENT_TOKEN_KEY);
        cursor.commit(&BrokenStore, ResumeToken::new("7", t0())).await;
        assert_eq!(cursor.load(&BrokenStore).await.unwrap().resource_version, "7");
    }
}
