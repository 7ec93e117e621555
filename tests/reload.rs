use std::fs;
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use livelisp::{
    ChangeEvent, ChangeKind, ChannelObserver, ExecutionContext, FileWatcher, LiveError, Origin,
    ReloadConfig, ReloadCoordinator, ReloadEvent, Value, WatchConfig,
};

fn coordinator() -> (ReloadCoordinator, mpsc::Receiver<ReloadEvent>) {
    let _ = tracing_subscriber::fmt::try_init();
    let (observer, rx) = ChannelObserver::channel();
    (
        ReloadCoordinator::with_observer(ReloadConfig::default(), Arc::new(observer)),
        rx,
    )
}

/// Rewrite `path` and deliver the matching notification, then wait for it.
fn edit(coord: &ReloadCoordinator, path: &Path, text: &str) {
    fs::write(path, text).unwrap();
    coord.notify(ChangeEvent::new(path, ChangeKind::Modified));
    coord.flush(path);
}

fn call(ctx: &ExecutionContext, code: &str) -> Value {
    ctx.run(code).unwrap().value.unwrap()
}

#[test]
fn edited_function_is_replaced_and_repl_state_survives() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lib.lisp");
    fs::write(&path, "(defn f [] 1)").unwrap();

    let (coord, _events) = coordinator();
    let ctx = Arc::new(ExecutionContext::new("c1"));
    ctx.run("(def x 42)").unwrap();
    coord.subscribe(&path, &ctx).unwrap();
    coord.flush(&path);
    assert_eq!(call(&ctx, "(f)"), Value::Int(1));

    edit(&coord, &path, "(defn f [] 2)");
    assert_eq!(call(&ctx, "(f)"), Value::Int(2));
    assert_eq!(ctx.lookup("x").unwrap(), Value::Int(42));
    assert!(matches!(ctx.provenance("x").unwrap().origin, Origin::Repl(_)));
    assert_eq!(ctx.provenance("f").unwrap().origin, Origin::file(&path));
}

#[test]
fn removed_definition_is_unbound() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ab.lisp");
    fs::write(&path, "(def a 1)\n(def b 2)").unwrap();

    let (coord, _events) = coordinator();
    let ctx = Arc::new(ExecutionContext::new("c1"));
    coord.subscribe(&path, &ctx).unwrap();
    coord.flush(&path);
    assert_eq!(ctx.lookup("b").unwrap(), Value::Int(2));

    edit(&coord, &path, "(def a 1)");
    assert!(matches!(ctx.lookup("b"), Err(LiveError::NameNotFound { .. })));
    assert_eq!(ctx.lookup("a").unwrap(), Value::Int(1));
}

#[test]
fn malformed_edit_is_rejected_without_touching_contexts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lib.lisp");
    fs::write(&path, "(def a 1)").unwrap();

    let (coord, events) = coordinator();
    let ctx = Arc::new(ExecutionContext::new("c1"));
    coord.subscribe(&path, &ctx).unwrap();
    coord.flush(&path);
    let _ = events.try_iter().count();

    edit(&coord, &path, "(def a 2)\n(def b (+ a");
    match events.try_recv().unwrap() {
        ReloadEvent::Rejected { error, .. } => assert!(matches!(*error, LiveError::Syntax { .. })),
        other => panic!("expected Rejected, got {:?}", other),
    }
    assert_eq!(ctx.lookup("a").unwrap(), Value::Int(1));
    assert!(!ctx.contains("b"));

    // fixing the file applies against the last good version
    edit(&coord, &path, "(def a 2)\n(def b (+ a 1))");
    assert_eq!(ctx.lookup("b").unwrap(), Value::Int(3));
}

#[test]
fn deleted_origin_removes_its_definitions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gone.lisp");
    fs::write(&path, "(def a 1)\n(defn g [] a)").unwrap();

    let (coord, _events) = coordinator();
    let ctx = Arc::new(ExecutionContext::new("c1"));
    ctx.run("(def keep 1)").unwrap();
    coord.subscribe(&path, &ctx).unwrap();
    coord.flush(&path);
    assert!(ctx.contains("g"));

    fs::remove_file(&path).unwrap();
    coord.notify(ChangeEvent::new(&path, ChangeKind::Deleted));
    coord.flush(&path);
    assert!(!ctx.contains("a"));
    assert!(!ctx.contains("g"));
    assert!(ctx.contains("keep"));
}

#[test]
fn notifications_apply_in_arrival_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seq.lisp");
    fs::write(&path, "(def v 0)").unwrap();

    let (coord, _events) = coordinator();
    let ctx = Arc::new(ExecutionContext::new("c1"));
    coord.subscribe(&path, &ctx).unwrap();
    for i in 1..=5 {
        fs::write(&path, format!("(def v {})", i)).unwrap();
        coord.notify(ChangeEvent::new(&path, ChangeKind::Modified));
    }
    coord.flush(&path);
    assert_eq!(ctx.lookup("v").unwrap(), Value::Int(5));
}

#[test]
fn every_subscribed_context_is_patched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.lisp");
    fs::write(&path, "(def n 1)").unwrap();

    let (coord, events) = coordinator();
    let a = Arc::new(ExecutionContext::new("a"));
    let b = Arc::new(ExecutionContext::new("b"));
    coord.subscribe(&path, &a).unwrap();
    coord.subscribe(&path, &b).unwrap();
    coord.flush(&path);
    let _ = events.try_iter().count();

    edit(&coord, &path, "(def n 2)");
    assert_eq!(a.lookup("n").unwrap(), Value::Int(2));
    assert_eq!(b.lookup("n").unwrap(), Value::Int(2));
    match events.try_recv().unwrap() {
        ReloadEvent::Applied { contexts, .. } => assert_eq!(contexts, vec!["a", "b"]),
        other => panic!("expected Applied, got {:?}", other),
    }
}

#[test]
fn dropped_context_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lib.lisp");
    fs::write(&path, "(def n 1)").unwrap();

    let (coord, events) = coordinator();
    let kept = Arc::new(ExecutionContext::new("kept"));
    let dropped = Arc::new(ExecutionContext::new("dropped"));
    coord.subscribe(&path, &kept).unwrap();
    coord.subscribe(&path, &dropped).unwrap();
    coord.flush(&path);
    drop(dropped);
    let _ = events.try_iter().count();

    edit(&coord, &path, "(def n 2)");
    match events.try_recv().unwrap() {
        ReloadEvent::Applied { contexts, .. } => assert_eq!(contexts, vec!["kept"]),
        other => panic!("expected Applied, got {:?}", other),
    }
}

#[test]
fn dependent_values_and_statements_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deps.lisp");
    fs::write(&path, "(def rate 2)\n(def total (* rate 10))\n(set! log (conj log total))").unwrap();

    let (coord, _events) = coordinator();
    let ctx = Arc::new(ExecutionContext::new("c1"));
    ctx.bind("log", Value::vector(Vec::new()));
    coord.subscribe(&path, &ctx).unwrap();
    coord.flush(&path);
    assert_eq!(ctx.lookup("log").unwrap().to_string(), "[20]");

    edit(&coord, &path, "(def rate 3)\n(def total (* rate 10))\n(set! log (conj log total))");
    assert_eq!(ctx.lookup("total").unwrap(), Value::Int(30));
    assert_eq!(ctx.lookup("log").unwrap().to_string(), "[20 30]");

    // unrelated addition: the statement does not run again
    edit(
        &coord,
        &path,
        "(def rate 3)\n(def total (* rate 10))\n(set! log (conj log total))\n(def other 0)",
    );
    assert_eq!(ctx.lookup("log").unwrap().to_string(), "[20 30]");
}

#[test]
fn failed_application_is_retried_against_last_good_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fail.lisp");
    fs::write(&path, "(def a 1)").unwrap();

    let (coord, events) = coordinator();
    let ctx = Arc::new(ExecutionContext::new("c1"));
    coord.subscribe(&path, &ctx).unwrap();
    coord.flush(&path);
    let _ = events.try_iter().count();

    edit(&coord, &path, "(def a 1)\n(def b (/ a 0))");
    match events.try_recv().unwrap() {
        ReloadEvent::Failed { context, error, .. } => {
            assert_eq!(context, "c1");
            assert!(error.as_execution().is_some());
        }
        other => panic!("expected Failed, got {:?}", other),
    }

    edit(&coord, &path, "(def a 1)\n(def b (/ a 1))");
    assert_eq!(ctx.lookup("b").unwrap(), Value::Int(1));
}

#[test]
fn origins_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.lisp");
    let bad = dir.path().join("bad.lisp");
    fs::write(&good, "(def g 1)").unwrap();
    fs::write(&bad, "(def b").unwrap();

    let (coord, _events) = coordinator();
    let ctx = Arc::new(ExecutionContext::new("c1"));
    coord.subscribe(&good, &ctx).unwrap();
    coord.subscribe(&bad, &ctx).unwrap();
    coord.flush_all();
    assert_eq!(ctx.lookup("g").unwrap(), Value::Int(1));
    assert!(!ctx.contains("b"));
    assert_eq!(coord.watched().len(), 2);
}

#[test]
fn watcher_forwards_file_edits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watched.lisp");
    fs::write(&path, "(def w 1)").unwrap();

    let (coord, _events) = coordinator();
    let ctx = Arc::new(ExecutionContext::new("c1"));
    coord.subscribe(&path, &ctx).unwrap();
    coord.flush(&path);

    let Ok(mut watcher) = FileWatcher::new(WatchConfig::default()) else {
        return; // no watch backend in this environment
    };
    watcher.watch_path(&path).unwrap();
    let handle = watcher.forward(coord.sender()).unwrap();

    fs::write(&path, "(def w 2)").unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline && ctx.lookup("w").unwrap() != Value::Int(2) {
        std::thread::sleep(Duration::from_millis(20));
    }
    handle.stop();
    assert_eq!(ctx.lookup("w").unwrap(), Value::Int(2));
}
