use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flux_common::transport::{BusConfig, MemoryHub, MessageBus};
use flux_watcher::{Repository, SystemSync};

struct Participant {
    bus: MessageBus,
    sync: SystemSync,
}

async fn participant(hub: &MemoryHub) -> Participant {
    participant_as(hub, "alice").await
}

/// A participant on the shared channel, synchronizing as `username`.
async fn participant_as(hub: &MemoryHub, username: &str) -> Participant {
    let bus = MessageBus::new(
        hub.transport(),
        BusConfig {
            channel: Some("alice".into()),
            join_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
        },
    );
    let repository = Arc::new(Repository::new().unwrap());
    let sync = SystemSync::new(&bus, repository, username);
    bus.connect().unwrap();
    bus.wait_ready().await.unwrap();
    Participant { bus, sync }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn content(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

#[tokio::test]
async fn test_connecting_a_project_fetches_existing_files() {
    let hub = MemoryHub::new();
    let laptop = tempfile::tempdir().unwrap();
    let desktop = tempfile::tempdir().unwrap();
    fs::create_dir(laptop.path().join("src")).unwrap();
    fs::write(laptop.path().join("src/lib.rs"), "pub fn x() {}").unwrap();

    let first = participant(&hub).await;
    first.sync.add_project("web", laptop.path()).unwrap();
    let second = participant(&hub).await;
    second.sync.add_project("web", desktop.path()).unwrap();

    let copied = desktop.path().join("src/lib.rs");
    eventually(|| content(&copied).as_deref() == Some("pub fn x() {}")).await;
    assert!(first.bus.is_connected() && second.bus.is_connected());
}

#[tokio::test]
async fn test_local_changes_reach_the_other_participant() {
    let hub = MemoryHub::new();
    let laptop = tempfile::tempdir().unwrap();
    let desktop = tempfile::tempdir().unwrap();
    let first = participant(&hub).await;
    let second = participant(&hub).await;
    first.sync.add_project("web", laptop.path()).unwrap();
    second.sync.add_project("web", desktop.path()).unwrap();

    fs::write(laptop.path().join("notes.md"), "draft").unwrap();
    let copied = desktop.path().join("notes.md");
    eventually(|| content(&copied).as_deref() == Some("draft")).await;

    // Later modifications must carry a newer timestamp to win.
    tokio::time::sleep(Duration::from_millis(20)).await;
    fs::write(laptop.path().join("notes.md"), "final").unwrap();
    eventually(|| content(&copied).as_deref() == Some("final")).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    fs::remove_file(laptop.path().join("notes.md")).unwrap();
    eventually(|| !copied.exists()).await;
}

#[tokio::test]
async fn test_unknown_projects_are_left_alone() {
    let hub = MemoryHub::new();
    let laptop = tempfile::tempdir().unwrap();
    let desktop = tempfile::tempdir().unwrap();
    let first = participant(&hub).await;
    let second = participant(&hub).await;
    first.sync.add_project("web", laptop.path()).unwrap();
    second.sync.add_project("docs", desktop.path()).unwrap();

    fs::write(laptop.path().join("a.txt"), "a").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!desktop.path().join("a.txt").exists());
}

#[tokio::test]
async fn test_dispose_stops_synchronization() {
    let hub = MemoryHub::new();
    let laptop = tempfile::tempdir().unwrap();
    let desktop = tempfile::tempdir().unwrap();
    let first = participant(&hub).await;
    let second = participant(&hub).await;
    first.sync.add_project("web", laptop.path()).unwrap();
    second.sync.add_project("web", desktop.path()).unwrap();

    second.sync.dispose();
    fs::write(laptop.path().join("a.txt"), "a").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!desktop.path().join("a.txt").exists());
    assert_eq!(second.bus.handler_count("resourceCreated"), 0);
}

#[tokio::test]
async fn test_other_users_projects_are_left_alone() {
    let hub = MemoryHub::new();
    let laptop = tempfile::tempdir().unwrap();
    let desktop = tempfile::tempdir().unwrap();
    let first = participant(&hub).await;
    let second = participant_as(&hub, "bob").await;
    first.sync.add_project("web", laptop.path()).unwrap();
    second.sync.add_project("web", desktop.path()).unwrap();

    fs::write(laptop.path().join("a.txt"), "a").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!desktop.path().join("a.txt").exists());
}

#[tokio::test]
async fn test_dropping_sync_deregisters_everything() {
    let hub = MemoryHub::new();
    let Participant { bus, sync } = participant(&hub).await;
    let repository = sync.repository().clone();
    assert!(bus.handler_count("resourceCreated") > 0);
    assert!(repository.events().listener_count() > 0);

    drop(sync);

    assert_eq!(bus.handler_count("resourceCreated"), 0);
    assert_eq!(bus.handler_count("getProjectRequest"), 0);
    assert_eq!(repository.events().listener_count(), 0);
}
