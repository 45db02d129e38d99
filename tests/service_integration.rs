//! Integration tests for WatchService (scanning, watching, graph sync)
//!
//! These tests verify end-to-end behavior using the public API:
//! - WatchService initialization and session lifecycle
//! - Batched startup scan and the file ceiling
//! - Steady-state add/change/delete observation
//! - Write effects re-entering the loop through the watcher
//!
//! Tests focus on observable behavior rather than internal implementation
//! details. File system notification timing varies by OS and load, so
//! waits are generous.

#![cfg(feature = "service")]

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use vaultgraph_core::{
    effects::WriteEffectExecutor,
    event::{Event, VaultEvent, WatchErrorKind},
    graph::Environment,
    sync::Subscription,
    watch::WatchService,
};

/// Helper to create a test vault with sample documents
fn create_test_vault(temp_dir: &TempDir) -> std::path::PathBuf {
    let vault = temp_dir.path().join("vault");
    std::fs::create_dir(&vault).unwrap();

    std::fs::write(
        vault.join("alpha.md"),
        "# Alpha\n\n## First document\n\nLinks to [[beta]].\n",
    )
    .unwrap();
    std::fs::write(vault.join("beta.md"), "# Beta\n\nPlain document.\n").unwrap();

    let nested = vault.join("notes");
    std::fs::create_dir(&nested).unwrap();
    std::fs::write(nested.join("gamma.md"), "# Gamma\n").unwrap();

    // Noise the scan must skip.
    std::fs::write(vault.join("ignored.txt"), "not a document").unwrap();
    std::fs::write(vault.join(".hidden.md"), "# Hidden").unwrap();

    vault
}

/// Subscription wrapper that buffers received events. Back-to-back
/// publications (a bulk load and its graph delta, an error and the stopped
/// event) arrive in one burst; buffering keeps the ones a test has not
/// asserted on yet instead of discarding them with the burst.
struct EventStream {
    rx: Subscription,
    buffered: VecDeque<Event>,
}

impl EventStream {
    fn new(rx: Subscription) -> Self {
        EventStream {
            rx,
            buffered: VecDeque::new(),
        }
    }

    /// Move everything currently queued on the subscription into the buffer.
    fn pump(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.buffered.push_back(event),
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    /// Discard and return everything observed so far.
    fn drain(&mut self) -> Vec<Event> {
        self.pump();
        self.buffered.drain(..).collect()
    }

    /// Consume buffered events in arrival order until one matches, or time
    /// out. Events after the match stay buffered for later assertions.
    fn wait_for<F>(&mut self, timeout: Duration, mut pred: F) -> Option<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            while let Some(event) = self.buffered.pop_front() {
                if pred(&event) {
                    return Some(event);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

fn settle() {
    std::thread::sleep(Duration::from_millis(800));
}

#[test]
fn test_watch_service_initialization() {
    let service = WatchService::new();
    assert!(
        service.is_ok(),
        "WatchService should initialize successfully"
    );
}

#[test]
fn test_start_emits_started_and_bulk_load() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);

    let service = WatchService::new().unwrap();
    let mut rx = EventStream::new(service.subscribe());
    service.start_watching(&vault).unwrap();

    let started = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::WatchingStarted { .. }))
    });
    assert!(started.is_some(), "Expected watching-started");

    // One aggregate bulk event, not one per file, and only real documents.
    let bulk = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::BulkLoaded { .. }))
    });
    match bulk {
        Some(Event::Vault(VaultEvent::BulkLoaded { files, .. })) => {
            let mut paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
            paths.sort_unstable();
            assert_eq!(paths, vec!["alpha.md", "beta.md", "notes/gamma.md"]);
        }
        other => panic!("Expected bulk-loaded, got {other:?}"),
    }

    // The bulk also produces one graph delta containing every node.
    let delta = rx.wait_for(Duration::from_secs(5), |e| matches!(e, Event::Graph(_)));
    match delta {
        Some(Event::Graph(delta)) => {
            let mut ids: Vec<_> = delta.upserted.iter().map(|n| n.id.as_str()).collect();
            ids.sort_unstable();
            assert_eq!(ids, vec!["alpha", "beta", "notes/gamma"]);
        }
        other => panic!("Expected graph delta, got {other:?}"),
    }

    service.stop_watching(&vault).unwrap();
}

#[test]
fn test_start_on_missing_directory_fails() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("does_not_exist");

    let service = WatchService::new().unwrap();
    let mut rx = EventStream::new(service.subscribe());

    let result = service.start_watching(&missing);
    assert!(result.is_err(), "Start on a missing directory must fail");

    let error = rx.wait_for(Duration::from_secs(2), |e| {
        matches!(
            e,
            Event::Vault(VaultEvent::WatchError {
                kind: WatchErrorKind::StartFailed,
                ..
            })
        )
    });
    assert!(error.is_some(), "Expected a start_failed notification");

    // The service survives a failed start.
    let vault = create_test_vault(&temp_dir);
    service.start_watching(&vault).unwrap();
    service.stop_watching(&vault).unwrap();
}

#[test]
fn test_steady_state_add_change_delete() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);

    let service = WatchService::new().unwrap();
    let mut rx = EventStream::new(service.subscribe());
    service.start_watching(&vault).unwrap();
    rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::BulkLoaded { .. }))
    })
    .expect("bulk load");
    settle();
    rx.drain();

    // Add
    let doc = vault.join("delta.md");
    std::fs::write(&doc, "# Delta\n\nSee [[alpha]].\n").unwrap();
    let added = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::FileAdded(record)) if record.path == "delta.md")
    });
    assert!(added.is_some(), "Expected file-added for delta.md");
    let delta = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Graph(d) if d.upserted.iter().any(|n| n.id == "delta"))
    });
    assert!(delta.is_some(), "Expected graph delta for the new node");

    // Change
    settle();
    rx.drain();
    std::fs::write(&doc, "# Delta v2\n").unwrap();
    let changed = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::FileChanged(record)) if record.path == "delta.md")
    });
    assert!(changed.is_some(), "Expected file-changed for delta.md");
    let delta = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Graph(d) if d.upserted.iter().any(|n| n.title == "Delta v2"))
    });
    assert!(delta.is_some(), "Expected graph delta for the changed node");

    // Delete
    settle();
    rx.drain();
    std::fs::remove_file(&doc).unwrap();
    let deleted = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::FileDeleted { path, .. }) if path == "delta.md")
    });
    assert!(deleted.is_some(), "Expected file-deleted for delta.md");
    let delta = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Graph(d) if d.removed.contains(&"delta".to_string()))
    });
    assert!(delta.is_some(), "Expected graph delta removing the node");

    service.stop_watching(&vault).unwrap();
}

#[test]
fn test_unchanged_rewrite_is_suppressed() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    let doc = vault.join("stable.md");
    std::fs::write(&doc, "# Stable\n").unwrap();

    let service = WatchService::new().unwrap();
    let mut rx = EventStream::new(service.subscribe());
    service.start_watching(&vault).unwrap();
    rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::BulkLoaded { .. }))
    })
    .expect("bulk load");

    // Prime the content hash with one observed change.
    settle();
    std::fs::write(&doc, "# Stable v2\n").unwrap();
    rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::FileChanged(record)) if record.path == "stable.md")
    })
    .expect("first change observed");
    settle();
    rx.drain();

    // Rewrite identical bytes: no change event should surface.
    std::fs::write(&doc, "# Stable v2\n").unwrap();
    let suppressed = rx.wait_for(Duration::from_secs(2), |e| {
        matches!(e, Event::Vault(VaultEvent::FileChanged(record)) if record.path == "stable.md")
    });
    assert!(
        suppressed.is_none(),
        "Byte-identical rewrite should be suppressed, got {suppressed:?}"
    );

    service.stop_watching(&vault).unwrap();
}

#[test]
fn test_file_limit_aborts_session_without_bulk() {
    let temp_dir = TempDir::new().unwrap();
    let vault = temp_dir.path().join("big_vault");
    std::fs::create_dir(&vault).unwrap();
    for i in 0..6 {
        std::fs::write(vault.join(format!("doc{i}.md")), format!("# Doc {i}\n")).unwrap();
    }

    let service = WatchService::new().unwrap().with_file_limit(5);
    let mut rx = EventStream::new(service.subscribe());
    service.start_watching(&vault).unwrap();

    let limit = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(
            e,
            Event::Vault(VaultEvent::WatchError {
                kind: WatchErrorKind::FileLimitExceeded,
                ..
            })
        )
    });
    assert!(limit.is_some(), "Expected file_limit_exceeded");

    settle();
    let leftovers = rx.drain();
    assert!(
        !leftovers
            .iter()
            .any(|e| matches!(e, Event::Vault(VaultEvent::BulkLoaded { .. }))),
        "No bulk load may follow a ceiling abort"
    );

    // The session tore itself down; stopping it again is a harmless no-op.
    service.stop_watching(&vault).unwrap();
}

#[test]
fn test_restart_reemits_bulk_without_rescan() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);

    let service = WatchService::new().unwrap();
    let mut rx = EventStream::new(service.subscribe());
    service.start_watching(&vault).unwrap();
    rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::BulkLoaded { .. }))
    })
    .expect("initial bulk load");
    settle();
    rx.drain();

    // Second start for the same root: no new session, state re-emitted.
    service.start_watching(&vault).unwrap();
    let started = rx.wait_for(Duration::from_secs(2), |e| {
        matches!(e, Event::Vault(VaultEvent::WatchingStarted { .. }))
    });
    assert!(started.is_some(), "Expected watching-started on restart");
    let bulk = rx.wait_for(Duration::from_secs(2), |e| {
        matches!(e, Event::Vault(VaultEvent::BulkLoaded { .. }))
    });
    match bulk {
        Some(Event::Vault(VaultEvent::BulkLoaded { files, .. })) => {
            assert_eq!(files.len(), 3, "Re-emitted bulk matches the known state");
        }
        other => panic!("Expected re-emitted bulk-loaded, got {other:?}"),
    }

    service.stop_watching(&vault).unwrap();
}

#[test]
fn test_stop_is_idempotent_and_emits_stopped() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);

    let service = WatchService::new().unwrap();
    let mut rx = EventStream::new(service.subscribe());
    service.start_watching(&vault).unwrap();
    rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::BulkLoaded { .. }))
    })
    .expect("bulk load");
    rx.drain();

    service.stop_watching(&vault).unwrap();
    let stopped = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::WatchingStopped {}))
    });
    assert!(stopped.is_some(), "Expected watching-stopped");

    // Second stop: no-op, no second stopped event.
    service.stop_watching(&vault).unwrap();
    settle();
    let leftovers = rx.drain();
    assert!(
        !leftovers
            .iter()
            .any(|e| matches!(e, Event::Vault(VaultEvent::WatchingStopped {}))),
        "Stop must be idempotent"
    );
}

#[test]
fn test_write_effects_reenter_through_watcher() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);

    let service = WatchService::new().unwrap();
    let mut rx = EventStream::new(service.subscribe());
    service.start_watching(&vault).unwrap();
    rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::BulkLoaded { .. }))
    })
    .expect("bulk load");
    settle();
    rx.drain();

    let executor = WriteEffectExecutor::new(Environment {
        root_path: vault.clone(),
    });
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    // Create: the executor writes, the watcher observes, the graph follows.
    let id = "effects/created".to_string();
    runtime
        .block_on(executor.create_node(&id, "# Created By Effect\n"))
        .unwrap();
    let added = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Graph(d) if d.upserted.iter().any(|n| n.id == "effects/created"))
    });
    assert!(added.is_some(), "Expected the created node in a graph delta");

    // Creating the same node again must refuse rather than clobber.
    let clobber = runtime.block_on(executor.create_node(&id, "# Overwrite\n"));
    assert!(clobber.is_err(), "create_node must not overwrite");

    // Delete: node disappears only via the observed removal.
    settle();
    rx.drain();
    runtime.block_on(executor.delete_node(&id)).unwrap();
    let removed = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Graph(d) if d.removed.contains(&id))
    });
    assert!(removed.is_some(), "Expected the deleted node in a graph delta");

    service.stop_watching(&vault).unwrap();
}

#[test]
fn test_ignored_files_produce_no_events() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);

    let service = WatchService::new().unwrap();
    let mut rx = EventStream::new(service.subscribe());
    service.start_watching(&vault).unwrap();
    rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::BulkLoaded { .. }))
    })
    .expect("bulk load");
    settle();
    rx.drain();

    std::fs::write(vault.join("scratch.txt"), "not a document").unwrap();
    std::fs::write(vault.join(".draft.md"), "# Hidden").unwrap();
    std::fs::write(vault.join("editor.md.tmp"), "# Temp").unwrap();

    settle();
    let events = rx.drain();
    assert!(
        events.is_empty(),
        "Ignored files must not surface events, got {events:?}"
    );

    service.stop_watching(&vault).unwrap();
}

#[test]
fn test_root_deletion_self_stops_with_distinguished_error() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);

    let service = WatchService::new().unwrap();
    let mut rx = EventStream::new(service.subscribe());
    service.start_watching(&vault).unwrap();
    rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::BulkLoaded { .. }))
    })
    .expect("bulk load");
    settle();
    rx.drain();

    std::fs::remove_dir_all(&vault).unwrap();

    let error = rx.wait_for(Duration::from_secs(10), |e| {
        matches!(
            e,
            Event::Vault(VaultEvent::WatchError {
                kind: WatchErrorKind::DirectoryDeleted,
                ..
            })
        )
    });
    assert!(error.is_some(), "Expected directory_deleted");
    let stopped = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, Event::Vault(VaultEvent::WatchingStopped {}))
    });
    assert!(stopped.is_some(), "Session must self-stop after root deletion");

    // A new session for a fresh root still works.
    let vault2 = temp_dir.path().join("vault2");
    std::fs::create_dir(&vault2).unwrap();
    service.start_watching(&vault2).unwrap();
    service.stop_watching(&vault2).unwrap();
    service.stop_watching(&vault).unwrap();
}

#[test]
fn test_shutdown_cleanup() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);

    {
        let service = WatchService::new().unwrap();
        service.start_watching(&vault).unwrap();
        std::thread::sleep(Duration::from_secs(1));
        // Service dropped here with a live session.
    }

    std::thread::sleep(Duration::from_millis(500));
    // If we got here without panics or hangs, cleanup worked.
}
