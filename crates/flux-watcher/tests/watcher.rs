use std::fs;
use std::sync::Arc;
use std::time::Duration;

use flux_watcher::{
    ListenerError, Repository, RepositoryEvent, RepositoryEventType, RepositoryListener,
    ResourceType,
};
use parking_lot::Mutex;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(RepositoryEventType, String, ResourceType)>>,
}

impl Recorder {
    fn saw(&self, kind: RepositoryEventType, path: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|(k, p, _)| *k == kind && p == path)
    }

    fn kind_of(&self, path: &str) -> Option<ResourceType> {
        self.events
            .lock()
            .iter()
            .find(|(k, p, _)| *k == RepositoryEventType::Created && p == path)
            .map(|(_, _, t)| *t)
    }
}

impl RepositoryListener for Recorder {
    fn event_types(&self) -> &[RepositoryEventType] {
        &[
            RepositoryEventType::Created,
            RepositoryEventType::Modified,
            RepositoryEventType::Deleted,
        ]
    }

    fn on_event(&self, event: &RepositoryEvent) -> Result<(), ListenerError> {
        self.events.lock().push((
            event.kind,
            event.resource.path().to_string(),
            event.resource.kind(),
        ));
        Ok(())
    }
}

fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached");
}

fn watched() -> (tempfile::TempDir, Repository, Arc<Recorder>) {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    repository.events().add_listener(recorder.clone());
    repository.add_project("web", dir.path()).unwrap();
    (dir, repository, recorder)
}

#[test]
fn test_file_lifecycle_is_reported() {
    let (dir, _repository, recorder) = watched();
    let file = dir.path().join("a.txt");

    fs::write(&file, "one").unwrap();
    eventually(|| recorder.saw(RepositoryEventType::Created, "a.txt"));
    assert_eq!(recorder.kind_of("a.txt"), Some(ResourceType::File));

    fs::write(&file, "two").unwrap();
    eventually(|| recorder.saw(RepositoryEventType::Modified, "a.txt"));

    fs::remove_file(&file).unwrap();
    eventually(|| recorder.saw(RepositoryEventType::Deleted, "a.txt"));
}

#[test]
fn test_new_directories_are_watched() {
    let (dir, repository, recorder) = watched();
    let sub = dir.path().join("src");

    fs::create_dir(&sub).unwrap();
    fs::write(sub.join("lib.rs"), "pub fn x() {}").unwrap();
    eventually(|| recorder.saw(RepositoryEventType::Created, "src"));
    eventually(|| recorder.saw(RepositoryEventType::Created, "src/lib.rs"));
    assert_eq!(recorder.kind_of("src"), Some(ResourceType::Folder));
    eventually(|| repository.watcher().watched_dirs() == 2);

    fs::write(sub.join("main.rs"), "fn main() {}").unwrap();
    eventually(|| recorder.saw(RepositoryEventType::Created, "src/main.rs"));
}

#[test]
fn test_deleted_directories_stop_being_watched() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("src/deep")).unwrap();
    let repository = Repository::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    repository.events().add_listener(recorder.clone());
    repository.add_project("web", dir.path()).unwrap();
    assert_eq!(repository.watcher().watched_dirs(), 3);

    fs::remove_dir_all(dir.path().join("src")).unwrap();

    eventually(|| recorder.saw(RepositoryEventType::Deleted, "src"));
    eventually(|| repository.watcher().watched_dirs() == 1);
}

#[test]
fn test_removed_project_is_quiet() {
    let (dir, repository, recorder) = watched();
    repository.remove_project("web").unwrap();

    fs::write(dir.path().join("late.txt"), "x").unwrap();
    std::thread::sleep(Duration::from_millis(200));

    assert!(!recorder.saw(RepositoryEventType::Created, "late.txt"));
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_is_skipped() {
    use std::os::unix::fs::PermissionsExt;

    let (dir, _repository, recorder) = watched();
    let staging = tempfile::tempdir().unwrap();
    let locked = staging.path().join("secret.txt");
    fs::write(&locked, "hidden").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read(&locked).is_ok() {
        // Running with privileges that ignore file modes.
        return;
    }

    let secret = dir.path().join("secret.txt");
    fs::rename(&locked, &secret).unwrap();
    fs::write(dir.path().join("good.txt"), "ok").unwrap();

    eventually(|| recorder.saw(RepositoryEventType::Created, "good.txt"));
    assert!(!recorder.saw(RepositoryEventType::Created, "secret.txt"));

    fs::set_permissions(&secret, fs::Permissions::from_mode(0o600)).unwrap();
    fs::write(&secret, "visible").unwrap();
    eventually(|| recorder.saw(RepositoryEventType::Modified, "secret.txt"));
}
