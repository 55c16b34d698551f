mod common;

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;

use livestack_core::session::{CycleEvent, SessionConfig, SkipReason};
use livestack_core::stack::{sidecar_path, StackConfig, StackState};

use common::{canonical, coordinator, coordinator_with, running_value, test_config, touch, FakeServices};

const SECOND: Duration = Duration::from_secs(1);

#[test]
fn test_initial_pass_picks_up_existing_files() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), &["a.fits", "b.fits", "c.fits"]);
    let services = Arc::new(
        FakeServices::new()
            .frame("a.fits", 100.0)
            .frame("b.fits", 110.0)
            .frame("c.fits", 400.0),
    );
    let (mut session, watcher) = coordinator(services.clone());

    let id = session.create_stack(&dir.path().join("a.fits"), StackConfig::default()).unwrap();
    let t0 = Instant::now();
    session.start_watching(id, t0).unwrap();
    assert_eq!(watcher.calls.lock().unwrap().len(), 1);
    assert!(session.has_pending_cycle(dir.path()));

    // Nothing happens before the fixed settle delay.
    assert!(session.poll(t0).is_empty());

    // The initial pass skips the settle time: reserve and run in one poll.
    let events = session.poll(t0 + SECOND);
    assert_eq!(events.len(), 2, "{events:?}");
    assert!(matches!(events[0], CycleEvent::Reserved { .. }));
    let CycleEvent::Completed { reports, .. } = &events[1] else {
        panic!("expected completion, got {:?}", events[1]);
    };
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1.folded(), 1);

    let stack = session.stack(id).unwrap();
    assert_abs_diff_eq!(running_value(&session, id), 105.0);
    assert_eq!(stack.processed_files(), ["a.fits", "b.fits", "c.fits"]);
    assert_eq!(stack.ignored_files(), ["c.fits"]);
    assert!(stack.new_files().is_empty());
    assert!(session.lock_holder().is_none());
    assert!(!session.has_pending_cycle(dir.path()));
}

#[test]
fn test_change_waits_for_settle_time() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), &["a.fits"]);
    let services = Arc::new(FakeServices::new().frame("a.fits", 0.5).frame("b.fits", 0.7));
    let (mut session, _) = coordinator(services.clone());
    let id = session.create_stack(&dir.path().join("a.fits"), StackConfig::default()).unwrap();

    let t0 = Instant::now();
    session.start_watching(id, t0).unwrap();
    let events = session.poll(t0 + SECOND);
    assert_eq!(
        events,
        vec![CycleEvent::Skipped {
            dir: canonical(dir.path()),
            reason: SkipReason::NoCandidates,
        }]
    );

    touch(dir.path(), &["b.fits"]);
    let t1 = t0 + 5 * SECOND;
    session.on_directory_changed(dir.path(), false, t1);
    // A burst of notifications is one cycle.
    session.on_directory_changed(dir.path(), false, t1 + Duration::from_millis(200));

    let events = session.poll(t1 + SECOND);
    assert_eq!(events, vec![CycleEvent::Reserved { dir: canonical(dir.path()) }]);
    assert_eq!(session.lock_holder(), Some(canonical(dir.path()).as_path()));
    assert!(services.aligned().is_empty());

    // settle_time_secs = 2
    assert!(session.poll(t1 + 2 * SECOND).is_empty());
    let events = session.poll(t1 + 3 * SECOND);
    assert!(matches!(events.as_slice(), [CycleEvent::Completed { .. }]));
    assert_eq!(services.aligned(), ["b.fits"]);
    assert_abs_diff_eq!(running_value(&session, id), 0.6, epsilon = 1e-6);
    assert_eq!(
        session.stack(id).unwrap().status(),
        "Monitoring, 2 frames stacked"
    );
}

#[test]
fn test_filters_partition_a_shared_directory() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), &["ha_ref.fits", "oiii_ref.fits"]);
    let services = Arc::new(
        FakeServices::new()
            .filtered_frame("ha_ref.fits", 0.5, "Ha")
            .filtered_frame("oiii_ref.fits", 0.5, "OIII")
            .filtered_frame("new.fits", 0.6, "OIII"),
    );
    let (mut session, watcher) = coordinator(services.clone());

    let ha = session.create_stack(&dir.path().join("ha_ref.fits"), StackConfig::default()).unwrap();
    let oiii = session.create_stack(&dir.path().join("oiii_ref.fits"), StackConfig::default()).unwrap();
    assert_eq!(session.stack(ha).unwrap().config.watch.filter, "Ha");
    assert_eq!(session.stack(oiii).unwrap().config.watch.filter, "OIII");

    let t0 = Instant::now();
    session.start_watching(ha, t0).unwrap();
    session.start_watching(oiii, t0).unwrap();
    // One registration serves both stacks.
    assert_eq!(watcher.calls.lock().unwrap().len(), 1);
    session.poll(t0 + SECOND);

    touch(dir.path(), &["new.fits"]);
    let t1 = t0 + 2 * SECOND;
    session.on_directory_changed(dir.path(), false, t1);
    session.poll(t1 + SECOND);
    session.poll(t1 + 3 * SECOND);

    let ha_stack = session.stack(ha).unwrap();
    let oiii_stack = session.stack(oiii).unwrap();
    assert_eq!(ha_stack.processed_files(), ["ha_ref.fits"]);
    assert_eq!(oiii_stack.processed_files(), ["oiii_ref.fits", "new.fits"]);
    assert_eq!(oiii_stack.frames_folded(), 2);
    assert_eq!(services.aligned(), ["new.fits"]);
}

#[test]
fn test_resumed_stack_skips_processed_files() {
    let root = tempfile::tempdir().unwrap();
    let frames = root.path().join("frames");
    let out = root.path().join("out");
    fs::create_dir_all(&frames).unwrap();
    fs::create_dir_all(&out).unwrap();
    touch(&frames, &["a.fits", "b.fits"]);
    let image_path = out.join("live_a.fits");

    let first = Arc::new(FakeServices::new().frame("a.fits", 100.0).frame("b.fits", 110.0));
    let (mut session, _) = coordinator(first.clone());
    let id = session.create_stack(&frames.join("a.fits"), StackConfig::default()).unwrap();
    session.stack_mut(id).unwrap().set_image_path(&image_path);
    session.set_export(id, true).unwrap();
    let t0 = Instant::now();
    session.start_watching(id, t0).unwrap();
    session.poll(t0 + SECOND);
    assert_eq!(first.aligned(), ["b.fits"]);

    // The running image is saved after every fold.
    assert!(image_path.exists());
    assert!(sidecar_path(&image_path).exists());
    let stopped = session.stop_stack(id).unwrap();
    assert_eq!(stopped.state(), StackState::Stopped);
    assert!(image_path.exists());
    drop(session);

    touch(&frames, &["d.fits"]);
    let second = Arc::new(
        FakeServices::new()
            .frame("a.fits", 100.0)
            .frame("b.fits", 110.0)
            .frame("d.fits", 120.0),
    );
    let (mut session, _) = coordinator(second.clone());
    let id = session.resume_stack(&image_path).unwrap();
    {
        let stack = session.stack(id).unwrap();
        assert_eq!(stack.processed_files(), ["a.fits", "b.fits"]);
        assert_eq!(stack.path_to_watch(), canonical(&frames).as_path());
        assert_eq!(stack.file_extension(), "fits");
        assert!(stack.export());
    }
    assert_abs_diff_eq!(running_value(&session, id), 105.0, epsilon = 1e-3);

    let t0 = Instant::now();
    session.start_watching(id, t0).unwrap();
    session.poll(t0 + SECOND);

    assert_eq!(second.aligned(), ["d.fits"]);
    let stack = session.stack(id).unwrap();
    assert_eq!(stack.processed_files(), ["a.fits", "b.fits", "d.fits"]);
    assert_abs_diff_eq!(running_value(&session, id), 110.0, epsilon = 1e-3);
}

#[test]
fn test_discarded_stack_removes_its_files() {
    let root = tempfile::tempdir().unwrap();
    touch(root.path(), &["a.fits", "b.fits"]);
    let out = tempfile::tempdir().unwrap();
    let image_path = out.path().join("live.fits");
    let services = Arc::new(FakeServices::new().frame("a.fits", 0.5).frame("b.fits", 0.6));
    let (mut session, watcher) = coordinator(services);

    let id = session.create_stack(&root.path().join("a.fits"), StackConfig::default()).unwrap();
    session.stack_mut(id).unwrap().set_image_path(&image_path);
    let t0 = Instant::now();
    session.start_watching(id, t0).unwrap();
    session.poll(t0 + SECOND);
    assert!(image_path.exists());

    session.stop_stack(id).unwrap();
    assert!(!image_path.exists());
    assert!(!sidecar_path(&image_path).exists());
    assert!(session.stack(id).is_none());
    let calls = watcher.calls.lock().unwrap();
    assert_eq!(calls.last().map(|c| c.0), Some("remove"));
}

#[test]
fn test_contended_directory_is_rescanned() {
    let root = tempfile::tempdir().unwrap();
    let a = root.path().join("a");
    let b = root.path().join("b");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();
    touch(&a, &["ref_a.fits"]);
    touch(&b, &["ref_b.fits"]);
    let services = Arc::new(
        FakeServices::new()
            .frame("ref_a.fits", 0.5)
            .frame("ref_b.fits", 0.5)
            .frame("new_a.fits", 0.5)
            .frame("new_b.fits", 0.5),
    );
    let (mut session, _) = coordinator(services.clone());
    let sa = session.create_stack(&a.join("ref_a.fits"), StackConfig::default()).unwrap();
    let sb = session.create_stack(&b.join("ref_b.fits"), StackConfig::default()).unwrap();

    let t0 = Instant::now();
    session.start_watching(sa, t0).unwrap();
    session.start_watching(sb, t0).unwrap();
    session.poll(t0 + SECOND);

    touch(&a, &["new_a.fits"]);
    touch(&b, &["new_b.fits"]);
    let t1 = t0 + 2 * SECOND;
    session.on_directory_changed(&a, false, t1);
    session.on_directory_changed(&b, false, t1);

    let events = session.poll(t1 + SECOND);
    assert_eq!(
        events,
        vec![
            CycleEvent::Reserved { dir: canonical(&a) },
            CycleEvent::Contended { dir: canonical(&b) },
        ]
    );
    let warned = session.stack(sb).unwrap().log().lines().any(|l| l.contains("waiting"));
    assert!(warned);

    // Completing `a` re-announces `b`.
    let t2 = t1 + 3 * SECOND;
    let events = session.poll(t2);
    assert!(matches!(events.as_slice(), [CycleEvent::Completed { .. }]));
    assert!(session.has_pending_cycle(&b));

    session.poll(t2 + SECOND);
    session.poll(t2 + 3 * SECOND);
    assert_eq!(services.aligned(), ["new_a.fits", "new_b.fits"]);
    assert_eq!(session.stack(sb).unwrap().frames_folded(), 2);
}

#[test]
fn test_contended_directory_is_dropped_without_rescan() {
    let root = tempfile::tempdir().unwrap();
    let a = root.path().join("a");
    let b = root.path().join("b");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();
    touch(&a, &["ref_a.fits"]);
    touch(&b, &["ref_b.fits"]);
    let services = Arc::new(
        FakeServices::new()
            .frame("ref_a.fits", 0.5)
            .frame("ref_b.fits", 0.5)
            .frame("new_a.fits", 0.5)
            .frame("new_b.fits", 0.5),
    );
    let config = SessionConfig {
        rescan_after_contention: false,
        ..test_config()
    };
    let (mut session, _) = coordinator_with(config, services.clone());
    let sa = session.create_stack(&a.join("ref_a.fits"), StackConfig::default()).unwrap();
    let sb = session.create_stack(&b.join("ref_b.fits"), StackConfig::default()).unwrap();
    let t0 = Instant::now();
    session.start_watching(sa, t0).unwrap();
    session.start_watching(sb, t0).unwrap();
    session.poll(t0 + SECOND);

    touch(&a, &["new_a.fits"]);
    touch(&b, &["new_b.fits"]);
    let t1 = t0 + 2 * SECOND;
    session.on_directory_changed(&a, false, t1);
    session.on_directory_changed(&b, false, t1);
    session.poll(t1 + SECOND);
    session.poll(t1 + 10 * SECOND);

    assert!(!session.has_pending_cycle(&b));
    assert_eq!(services.aligned(), ["new_a.fits"]);
    assert_eq!(session.stack(sb).unwrap().frames_folded(), 1);
}

#[test]
fn test_stopped_watching_takes_effect_next_cycle() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), &["a.fits"]);
    let services = Arc::new(FakeServices::new().frame("a.fits", 0.5).frame("b.fits", 0.5));
    let (mut session, watcher) = coordinator(services.clone());
    let id = session.create_stack(&dir.path().join("a.fits"), StackConfig::default()).unwrap();
    let t0 = Instant::now();
    session.start_watching(id, t0).unwrap();
    session.stop_watching(id).unwrap();

    touch(dir.path(), &["b.fits"]);
    let events = session.poll(t0 + SECOND);
    assert_eq!(
        events,
        vec![CycleEvent::Skipped {
            dir: canonical(dir.path()),
            reason: SkipReason::NoWatchingStacks,
        }]
    );
    assert!(services.aligned().is_empty());
    let calls = watcher.calls.lock().unwrap();
    assert_eq!(calls.iter().map(|c| c.0).collect::<Vec<_>>(), ["add", "remove"]);
}

#[test]
fn test_unwatched_directory_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _) = coordinator(Arc::new(FakeServices::new()));
    let now = Instant::now();
    session.on_directory_changed(dir.path(), false, now);
    assert!(!session.has_pending_cycle(dir.path()));
    assert!(session.poll(now + 10 * SECOND).is_empty());
}
