use anyhow::Result;
use podpool_core::{Pod, PodRuntime};
use std::sync::Arc;

/// Read-only view of the pods known to the runtime.
#[derive(Clone)]
pub struct PodRegistry {
    runtime: Arc<dyn PodRuntime>,
}

impl std::fmt::Debug for PodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodRegistry").finish_non_exhaustive()
    }
}

impl PodRegistry {
    pub fn new(runtime: Arc<dyn PodRuntime>) -> Self {
        Self { runtime }
    }

    /// Visit pods in listing order until `walker` returns false.
    pub async fn visit_pods(&self, mut walker: impl FnMut(&Pod) -> bool) -> Result<()> {
        for pod in self.runtime.list().await? {
            if !walker(&pod) {
                break;
            }
        }
        Ok(())
    }

    /// Running pods matching `keep`, in listing order.
    pub async fn running(&self, keep: impl Fn(&Pod) -> bool) -> Result<Vec<Pod>> {
        let mut found = Vec::new();
        self.visit_pods(|pod| {
            if pod.is_running() && keep(pod) {
                found.push(pod.clone());
            }
            true
        })
        .await?;
        Ok(found)
    }

    /// The first running pod named `app_name`, if any.
    pub async fn find_running(&self, app_name: &str) -> Result<Option<Pod>> {
        let mut found = None;
        self.visit_pods(|pod| {
            if pod.is_running() && pod.app_name == app_name {
                found = Some(pod.clone());
            }
            found.is_none()
        })
        .await?;
        Ok(found)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use podpool_core::PodState;
    use podpool_core::fakes::{FakeRuntime, pod};

    fn registry() -> (Arc<FakeRuntime>, PodRegistry) {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add_pod(pod("u1", "podpool-alice", "img:1", PodState::Exited));
        runtime.add_pod(pod("u2", "podpool-bob", "img:1", PodState::Running));
        runtime.add_pod(pod("u3", "podpool-alice", "img:1", PodState::Running));
        runtime.add_pod(pod("u4", "podpool-alice", "img:2", PodState::Running));
        let registry = PodRegistry::new(Arc::clone(&runtime) as Arc<dyn PodRuntime>);
        (runtime, registry)
    }

    #[tokio::test]
    async fn visit_stops_early() {
        let (_rt, registry) = registry();
        let mut seen = Vec::new();
        registry
            .visit_pods(|p| {
                seen.push(p.uuid.clone());
                p.uuid != "u2"
            })
            .await
            .unwrap();
        assert_eq!(seen, ["u1", "u2"]);
    }

    #[tokio::test]
    async fn find_running_skips_exited() {
        let (_rt, registry) = registry();
        let found = registry.find_running("podpool-alice").await.unwrap().unwrap();
        assert_eq!(found.uuid, "u3");
        assert!(registry.find_running("podpool-carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn running_filters_in_order() {
        let (_rt, registry) = registry();
        let pods = registry
            .running(|p| p.app_name == "podpool-alice")
            .await
            .unwrap();
        let uuids: Vec<_> = pods.iter().map(|p| p.uuid.as_str()).collect();
        assert_eq!(uuids, ["u3", "u4"]);
    }

    #[tokio::test]
    async fn listing_failure_propagates() {
        let (rt, registry) = registry();
        rt.fail_list("rkt list: permission denied");
        let err = registry.visit_pods(|_| true).await.unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }
}
