use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

/// The cluster leader-election primitive.
pub trait LeaderElector: Debug + Send + Sync {
    fn is_leader(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;
}

/// Used when the agent runs as a single replica.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysLeader;

impl LeaderElector for AlwaysLeader {
    fn is_leader(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async { Ok(true) })
    }
}

/// An elector with a fixed outcome.
#[derive(Debug, Clone, Copy)]
pub enum FixedElector {
    Leader,
    Follower,
    Broken,
}

impl LeaderElector for FixedElector {
    fn is_leader(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let outcome = *self;
        Box::pin(async move {
            match outcome {
                FixedElector::Leader => Ok(true),
                FixedElector::Follower => Ok(false),
                FixedElector::Broken => anyhow::bail!("leader election lease unavailable"),
            }
        })
    }
}

/// Decides whether a cluster-scoped check may run. Followers are skipped
/// silently; a failing elector is a warning and also skips the run.
pub async fn may_run(check: &str, skip_leader_election: bool, elector: &dyn LeaderElector) -> bool {
    if skip_leader_election {
        return true;
    }
    match elector.is_leader().await {
        Ok(true) => true,
        Ok(false) => {
            log::debug!(check = check; "{}", crate::Error::NotLeader);
            false
        }
        Err(err) => {
            log::warn!(check = check; "leader election failed, skipping run: {:#}", err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_follows_the_elector() {
        assert!(may_run("c", false, &AlwaysLeader).await);
        assert!(may_run("c", false, &FixedElector::Leader).await);
        assert!(!may_run("c", false, &FixedElector::Follower).await);
        assert!(!may_run("c", false, &FixedElector::Broken).await);
        assert!(may_run("c", true, &FixedElector::Broken).await);
    }
}
