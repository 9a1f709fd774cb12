/*!
 * Tests for progress routing
 */

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use docjobs::jobs::{ProgressCallback, ProgressRegistry, ProgressReporter, ProgressUpdate};

/// A callback may call back into the registry without deadlocking
#[test]
fn test_report_withReentrantCallback_shouldNotDeadlock() {
    let registry = Arc::new(ProgressRegistry::new());
    let weak = Arc::downgrade(&registry);
    let callback: ProgressCallback = Arc::new(move |update: &ProgressUpdate| {
        if let Some(registry) = weak.upgrade() {
            if update.current == update.total {
                registry.unregister(&update.job_id);
            }
        }
    });
    registry.register("job", callback);

    assert!(registry.report("job", 1, 2, None));
    assert!(registry.report("job", 2, 2, None));
    assert!(!registry.is_registered("job"));
}

/// Reports from many threads all reach the callback
#[test]
fn test_report_fromManyThreads_shouldDeliverEveryEvent() {
    let registry = Arc::new(ProgressRegistry::new());
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    registry.register(
        "job",
        Arc::new(move |_: &ProgressUpdate| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..100 {
                    registry.report("job", i, 100, None);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(delivered.load(Ordering::SeqCst), 800);
}

/// Labels are forwarded to the callback and kept in the snapshot
#[test]
fn test_reporter_report_shouldForwardLabel() {
    let registry = Arc::new(ProgressRegistry::new());
    let labels = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&labels);
    registry.register(
        "job",
        Arc::new(move |update: &ProgressUpdate| {
            sink.lock().push(update.label.clone());
        }),
    );
    let reporter = ProgressReporter::new("job", Arc::clone(&registry), Duration::ZERO);

    assert!(reporter.report(1, 3, Some("intro.txt")));
    assert_eq!(*labels.lock(), vec![Some("intro.txt".to_string())]);
    assert_eq!(registry.snapshot("job").unwrap().total, 3);
    assert_eq!(reporter.job_id(), "job");
}

/// A detached reporter accepts reports without any listener
#[test]
fn test_detachedReporter_report_shouldBeIgnored() {
    let reporter = ProgressReporter::detached("job");
    assert!(!reporter.report(1, 1, None));
}
