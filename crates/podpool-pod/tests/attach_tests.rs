#![allow(clippy::unwrap_used)]

use podpool_core::fakes::{FakeRuntime, pod};
use podpool_core::{PodRuntime, PodState, RuntimeExit};
use podpool_pod::{AttachAborted, AttachSettings, Attacher};
use std::sync::Arc;
use std::time::Duration;

fn settings() -> AttachSettings {
    AttachSettings {
        poll_interval: Duration::from_millis(10),
        settle: Duration::from_millis(10),
        ready_path: None,
    }
}

fn attacher(runtime: &Arc<FakeRuntime>, settings: AttachSettings) -> Attacher {
    Attacher::new(Arc::clone(runtime) as Arc<dyn PodRuntime>, settings)
}

async fn wait(attacher: &mut Attacher) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), attacher.wait())
        .await
        .unwrap()
}

#[tokio::test]
async fn attaches_once_the_pod_runs() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_pod(pod("old", "batch-7", "img:1", PodState::Exited));
    let mut attacher = attacher(&runtime, settings());
    attacher.by_name("batch-7");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(runtime.calls_for("attach").is_empty());
    runtime.add_pod(pod("new", "batch-7", "img:1", PodState::Running));

    wait(&mut attacher).await.unwrap();
    assert_eq!(runtime.calls_for("attach"), ["new"]);
}

#[tokio::test]
async fn abort_before_pod_appears() {
    let runtime = Arc::new(FakeRuntime::new());
    let mut attacher = attacher(&runtime, settings());
    attacher.by_name("never");

    tokio::time::sleep(Duration::from_millis(30)).await;
    attacher.abort();
    attacher.abort();

    let err = wait(&mut attacher).await.unwrap_err();
    assert!(err.downcast_ref::<AttachAborted>().is_some());
    assert!(runtime.calls_for("attach").is_empty());
}

#[tokio::test]
async fn abort_handle_cancels_from_elsewhere() {
    let runtime = Arc::new(FakeRuntime::new());
    let mut attacher = attacher(&runtime, settings());
    attacher.by_name("never");

    let handle = attacher.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });

    let err = wait(&mut attacher).await.unwrap_err();
    assert!(err.downcast_ref::<AttachAborted>().is_some());
}

#[tokio::test]
async fn attach_failure_is_reported() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_pod(pod("u1", "batch-7", "img:1", PodState::Running));
    runtime.set_attach_exit(3);
    let mut attacher = attacher(&runtime, settings());
    attacher.by_name("batch-7");

    let err = wait(&mut attacher).await.unwrap_err();
    let exit = err.downcast_ref::<RuntimeExit>().unwrap();
    assert_eq!(exit.code, Some(3));
}

#[tokio::test]
async fn listing_errors_are_retried() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.fail_list("rkt list: exit status 1");
    let mut attacher = attacher(&runtime, settings());
    attacher.by_name("batch-7");

    tokio::time::sleep(Duration::from_millis(50)).await;
    attacher.abort();
    let err = wait(&mut attacher).await.unwrap_err();

    assert!(err.downcast_ref::<AttachAborted>().is_some());
    assert!(runtime.calls().iter().filter(|c| *c == "list").count() > 1);
}

#[tokio::test]
async fn wait_after_completion_and_late_abort() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_pod(pod("u1", "batch-7", "img:1", PodState::Running));
    let mut attacher = attacher(&runtime, settings());
    attacher.by_name("batch-7");

    wait(&mut attacher).await.unwrap();
    attacher.abort();
    wait(&mut attacher).await.unwrap();
    assert_eq!(runtime.calls_for("attach"), ["u1"]);
}

#[tokio::test]
async fn second_session_is_ignored() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_pod(pod("u1", "batch-7", "img:1", PodState::Running));
    runtime.add_pod(pod("u2", "batch-8", "img:1", PodState::Running));
    let mut attacher = attacher(&runtime, settings());
    attacher.by_name("batch-7");
    attacher.by_name("batch-8");

    wait(&mut attacher).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(runtime.calls_for("attach"), ["u1"]);
}

#[tokio::test]
async fn wait_without_session() {
    let runtime = Arc::new(FakeRuntime::new());
    let mut attacher = attacher(&runtime, settings());
    wait(&mut attacher).await.unwrap();
}

#[tokio::test]
async fn ready_file_is_created_while_attached() {
    #[derive(Debug)]
    struct SlowAttach(FakeRuntime);

    #[async_trait::async_trait]
    impl PodRuntime for SlowAttach {
        async fn list(&self) -> anyhow::Result<Vec<podpool_core::Pod>> {
            self.0.list().await
        }
        async fn status(&self, uuid: &str) -> anyhow::Result<podpool_core::StatusReport> {
            self.0.status(uuid).await
        }
        async fn cat_manifest(&self, uuid: &str) -> anyhow::Result<podpool_core::PodManifest> {
            self.0.cat_manifest(uuid).await
        }
        async fn attach(&self, uuid: &str) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.0.attach(uuid).await
        }
        async fn stop(&self, uuid: &str) -> anyhow::Result<()> {
            self.0.stop(uuid).await
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("attached");
    let runtime = SlowAttach(FakeRuntime::new());
    runtime
        .0
        .add_pod(pod("u1", "batch-7", "img:1", PodState::Running));

    let mut attacher = Attacher::new(
        Arc::new(runtime),
        AttachSettings {
            ready_path: Some(ready.clone()),
            ..settings()
        },
    );
    attacher.by_name("batch-7");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(ready.exists());
    wait(&mut attacher).await.unwrap();
}

#[tokio::test]
async fn ready_file_is_created_when_attach_fails_early() {
    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("attached");
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_pod(pod("u1", "batch-7", "img:1", PodState::Running));
    runtime.set_attach_exit(1);

    let mut attacher = attacher(
        &runtime,
        AttachSettings {
            ready_path: Some(ready.clone()),
            ..settings()
        },
    );
    attacher.by_name("batch-7");

    let err = wait(&mut attacher).await.unwrap_err();
    assert!(err.downcast_ref::<RuntimeExit>().is_some());
    assert!(ready.exists());
}

#[tokio::test]
async fn ready_file_is_created_on_abort() {
    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("attached");
    let runtime = Arc::new(FakeRuntime::new());

    let mut attacher = attacher(
        &runtime,
        AttachSettings {
            ready_path: Some(ready.clone()),
            ..settings()
        },
    );
    attacher.by_name("batch-7");
    attacher.abort();

    let err = wait(&mut attacher).await.unwrap_err();
    assert!(err.downcast_ref::<AttachAborted>().is_some());
    assert!(ready.exists());
    assert!(runtime.calls_for("attach").is_empty());
}
