use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use rrsources::{ReloadOutcome, Source, SourceRegistry, SourceType};
use tempfile::{TempDir, tempdir};

fn source(id: &str) -> Source {
    Source::new(id, id.to_uppercase(), SourceType::SpotifyPlaylist)
}

fn write_sources(path: &Path, ids: &[&str]) {
    let sources: Vec<Source> = ids.iter().map(|id| source(id)).collect();
    fs::write(path, serde_json::to_string(&sources).unwrap()).unwrap();
}

fn create_test_registry(ids: &[&str]) -> (TempDir, PathBuf, SourceRegistry) {
    let dir = tempdir().unwrap();
    let sources_path = dir.path().join("sources.json");
    write_sources(&sources_path, ids);
    let registry = SourceRegistry::open(&sources_path, dir.path().join("state.json"));
    (dir, sources_path, registry)
}

#[test]
fn test_open_starts_at_first_source() {
    let (_dir, _, registry) = create_test_registry(&["a", "b", "c"]);
    assert_eq!(registry.len(), 3);
    assert_eq!(registry.current_index(), 0);
    assert_eq!(registry.current().unwrap().id, "a");
}

#[test]
fn test_missing_sources_file_is_empty() {
    let dir = tempdir().unwrap();
    let registry =
        SourceRegistry::open(dir.path().join("none.json"), dir.path().join("state.json"));
    assert!(registry.is_empty());
    assert!(registry.current().is_none());
}

#[test]
fn test_malformed_sources_file_opens_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sources.json");
    fs::write(&path, "[{\"id\": \"a\"").unwrap();
    let registry = SourceRegistry::open(&path, dir.path().join("state.json"));
    assert!(registry.is_empty());
}

#[test]
fn test_unknown_source_type_keeps_valid_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sources.json");
    fs::write(
        &path,
        r#"[
            {"id": "news", "label": "News", "type": "youtube_channel", "channel_id": "UC1"},
            {"type": "soundcloud"}
        ]"#,
    )
    .unwrap();

    let registry = SourceRegistry::open(&path, dir.path().join("state.json"));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.current().unwrap().id, "news");
}

fn touch_later(path: &Path, secs: u64) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

#[test]
fn test_failed_reload_is_not_retried_until_file_changes() {
    let (_dir, sources_path, mut registry) = create_test_registry(&["a", "b"]);

    fs::write(&sources_path, "not json").unwrap();
    touch_later(&sources_path, 5);
    assert!(registry.reload_if_changed().is_err());
    assert_eq!(registry.len(), 2);
    // Same broken file: no new attempt, no new warning
    assert_eq!(registry.reload_if_changed().unwrap(), None);

    write_sources(&sources_path, &["a", "b", "c"]);
    touch_later(&sources_path, 10);
    assert!(registry.reload_if_changed().unwrap().is_some());
    assert_eq!(registry.len(), 3);
}

#[test]
fn test_cycle_wraps_around() {
    let (_dir, _, mut registry) = create_test_registry(&["a", "b", "c"]);
    assert_eq!(registry.peek_next().unwrap().id, "b");
    assert_eq!(registry.cycle().unwrap().id, "b");
    assert_eq!(registry.cycle().unwrap().id, "c");
    assert_eq!(registry.cycle().unwrap().id, "a");
}

#[test]
fn test_cycle_single_source_returns_itself() {
    let (_dir, _, mut registry) = create_test_registry(&["only"]);
    let before = registry.current().unwrap();
    let after = registry.cycle().unwrap();
    assert!(before.same_as(&after));
}

#[test]
fn test_index_persists_across_restart() {
    let (dir, sources_path, mut registry) = create_test_registry(&["a", "b", "c"]);
    registry.cycle();
    registry.cycle();
    drop(registry);

    let state = fs::read_to_string(dir.path().join("state.json")).unwrap();
    assert!(state.contains("\"current_source_index\": 2"));
    assert!(state.contains("last_updated"));

    let reopened = SourceRegistry::open(&sources_path, dir.path().join("state.json"));
    assert_eq!(reopened.current().unwrap().id, "c");
}

#[test]
fn test_out_of_range_state_resets_to_zero() {
    let dir = tempdir().unwrap();
    let sources_path = dir.path().join("sources.json");
    write_sources(&sources_path, &["a", "b"]);
    fs::write(
        dir.path().join("state.json"),
        r#"{"current_source_index": 7, "last_updated": "2024-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let registry = SourceRegistry::open(&sources_path, dir.path().join("state.json"));
    assert_eq!(registry.current_index(), 0);
}

#[test]
fn test_reload_preserves_current_by_id() {
    let (_dir, sources_path, mut registry) = create_test_registry(&["a", "b", "c"]);
    registry.set_current_index(1).unwrap();

    write_sources(&sources_path, &["a", "b"]);
    let outcome = registry.reload().unwrap();

    assert_eq!(outcome, ReloadOutcome::Preserved { index: 1 });
    assert_eq!(registry.current().unwrap().id, "b");
}

#[test]
fn test_reload_follows_moved_source() {
    let (_dir, sources_path, mut registry) = create_test_registry(&["a", "b", "c"]);
    registry.set_current_index(1).unwrap();

    write_sources(&sources_path, &["c", "a", "x", "b"]);
    registry.reload().unwrap();

    assert_eq!(registry.current_index(), 3);
    assert_eq!(registry.current().unwrap().id, "b");
}

#[test]
fn test_reload_resets_when_current_removed() {
    let (_dir, sources_path, mut registry) = create_test_registry(&["a", "b", "c"]);
    registry.set_current_index(1).unwrap();

    write_sources(&sources_path, &["a", "c"]);
    let outcome = registry.reload().unwrap();

    assert_eq!(outcome, ReloadOutcome::Reset);
    assert_eq!(registry.current_index(), 0);
    assert_eq!(registry.current().unwrap().id, "a");
}

#[test]
fn test_reload_if_changed_uses_mtime() {
    let (_dir, sources_path, mut registry) = create_test_registry(&["a", "b"]);
    assert_eq!(registry.reload_if_changed().unwrap(), None);

    write_sources(&sources_path, &["a", "b", "c"]);
    let later = SystemTime::now() + Duration::from_secs(5);
    File::options()
        .write(true)
        .open(&sources_path)
        .unwrap()
        .set_modified(later)
        .unwrap();

    let outcome = registry.reload_if_changed().unwrap();
    assert_eq!(outcome, Some(ReloadOutcome::Preserved { index: 0 }));
    assert_eq!(registry.len(), 3);
    assert_eq!(registry.reload_if_changed().unwrap(), None);
}

#[test]
fn test_select_by_id() {
    let (_dir, _, mut registry) = create_test_registry(&["a", "b", "c"]);
    assert_eq!(registry.select_by_id("c").unwrap().id, "c");
    assert_eq!(registry.current_index(), 2);
    assert!(registry.select_by_id("zzz").is_err());
    assert!(registry.set_current_index(9).is_err());
}
