//! In-memory runtime for testing.
#![allow(clippy::unwrap_used)]

use crate::traits::PodRuntime;
use crate::types::{AppSpec, ManifestApp, Pod, PodManifest, PodState, RuntimeExit, StatusReport};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// Build a pod listing row.
pub fn pod(uuid: &str, app_name: &str, image: &str, state: PodState) -> Pod {
    Pod {
        uuid: uuid.to_owned(),
        app_name: app_name.to_owned(),
        image: image.to_owned(),
        state,
        created: None,
        started: None,
    }
}

/// Fake runtime holding its pods in memory.
///
/// Status queries return scripted reports first, then the pod's listed state.
/// Every call is recorded as `"<command> <uuid>"` (or `"list"`).
#[derive(Debug, Default)]
pub struct FakeRuntime {
    pods: Mutex<Vec<Pod>>,
    manifests: Mutex<HashMap<String, PodManifest>>,
    statuses: Mutex<HashMap<String, VecDeque<StatusReport>>>,
    list_error: Mutex<Option<String>>,
    failing_stops: Mutex<HashSet<String>>,
    attach_exit: Mutex<Option<i32>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    /// Add a running pod whose manifest runs as `user`, returning its UUID.
    pub fn spawn_pod(&self, app_name: &str, image: &str, user: u32) -> String {
        let uuid = uuid::Uuid::new_v4().to_string();
        self.add_pod(pod(&uuid, app_name, image, PodState::Running));
        self.set_manifest_user(&uuid, &user.to_string());
        uuid
    }

    pub fn set_manifest_user(&self, uuid: &str, user: &str) {
        let manifest = PodManifest {
            apps: vec![ManifestApp {
                name: String::new(),
                app: AppSpec {
                    user: user.to_owned(),
                },
            }],
        };
        self.manifests
            .lock()
            .unwrap()
            .insert(uuid.to_owned(), manifest);
    }

    pub fn push_status(&self, uuid: &str, report: StatusReport) {
        self.statuses
            .lock()
            .unwrap()
            .entry(uuid.to_owned())
            .or_default()
            .push_back(report);
    }

    pub fn fail_list(&self, message: &str) {
        *self.list_error.lock().unwrap() = Some(message.to_owned());
    }

    pub fn fail_stop(&self, uuid: &str) {
        self.failing_stops.lock().unwrap().insert(uuid.to_owned());
    }

    pub fn set_attach_exit(&self, code: i32) {
        *self.attach_exit.lock().unwrap() = Some(code);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, command: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&format!("{command} ")).map(str::to_owned))
            .collect()
    }

    pub fn state_of(&self, uuid: &str) -> Option<PodState> {
        self.pods
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.uuid == uuid)
            .map(|p| p.state.clone())
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PodRuntime for FakeRuntime {
    async fn list(&self) -> Result<Vec<Pod>> {
        self.record("list".to_owned());
        if let Some(message) = self.list_error.lock().unwrap().clone() {
            anyhow::bail!(message);
        }
        Ok(self.pods.lock().unwrap().clone())
    }

    async fn status(&self, uuid: &str) -> Result<StatusReport> {
        self.record(format!("status {uuid}"));
        let scripted = self
            .statuses
            .lock()
            .unwrap()
            .get_mut(uuid)
            .and_then(VecDeque::pop_front);
        if let Some(report) = scripted {
            return Ok(report);
        }
        Ok(match self.state_of(uuid) {
            Some(state) => StatusReport {
                success: true,
                state: Some(state),
            },
            None => StatusReport {
                success: false,
                state: None,
            },
        })
    }

    async fn cat_manifest(&self, uuid: &str) -> Result<PodManifest> {
        self.record(format!("cat-manifest {uuid}"));
        self.manifests
            .lock()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no manifest for pod {uuid}"))
    }

    async fn attach(&self, uuid: &str) -> Result<()> {
        self.record(format!("attach {uuid}"));
        match *self.attach_exit.lock().unwrap() {
            Some(code) if code != 0 => Err(RuntimeExit {
                command: "rkt attach".to_owned(),
                code: Some(code),
            }
            .into()),
            _ => Ok(()),
        }
    }

    async fn stop(&self, uuid: &str) -> Result<()> {
        self.record(format!("stop {uuid}"));
        if self.failing_stops.lock().unwrap().contains(uuid) {
            return Err(RuntimeExit {
                command: "rkt stop".to_owned(),
                code: Some(1),
            }
            .into());
        }
        if let Some(p) = self.pods.lock().unwrap().iter_mut().find(|p| p.uuid == uuid) {
            p.state = PodState::Exited;
        }
        Ok(())
    }
}
