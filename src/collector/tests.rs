use std::sync::atomic::AtomicUsize;
use std::thread;

use super::*;

/// Resolves unit `n` to `/work/unit<n>.rs` and counts resolutions.
#[derive(Default)]
struct CountingResolver {
    calls: AtomicUsize,
}

impl UnitResolver for CountingResolver {
    fn resolve(&self, unit: UnitId) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(format!("/work/unit{unit}.rs"))
    }
}

fn collector_with(resolver: Arc<dyn UnitResolver>) -> Collector {
    Collector::new(resolver, RefFilter::default(), true)
}

#[test]
fn test_unit_table_assigns_stable_ids() {
    let table = UnitTable::new();
    let a = table.register("/work/a.rs").unwrap();
    let b = table.register("/work/b.rs").unwrap();
    assert_ne!(a, b);
    assert_eq!(table.register("/work/a.rs"), Some(a));
    assert_eq!(table.len(), 2);
    assert_eq!(table.resolve(b).as_deref(), Some("/work/b.rs"));
    assert_eq!(table.resolve(99), None);
}

#[test]
#[cfg(target_pointer_width = "64")]
fn test_unit_ids_do_not_wrap() {
    assert_eq!(next_id(0), Some(0));
    assert_eq!(next_id(UnitId::MAX as usize), Some(UnitId::MAX));
    assert_eq!(next_id(UnitId::MAX as usize + 1), None);
}

#[test]
fn test_touch_records_each_unit_once() {
    let resolver = Arc::new(CountingResolver::default());
    let collector = collector_with(resolver.clone());

    // Same unit from many probe sites, and many units from one site
    for probe in 0..100 {
        collector.touch(7, probe);
    }
    for unit in 0..5 {
        collector.touch(unit, 42);
        collector.touch(unit, 42);
    }

    assert_eq!(resolver.calls.load(Ordering::SeqCst), 6);
    assert_eq!(
        collector.snapshot(),
        vec![
            "/work/unit0.rs",
            "/work/unit1.rs",
            "/work/unit2.rs",
            "/work/unit3.rs",
            "/work/unit4.rs",
            "/work/unit7.rs",
        ]
    );
}

#[test]
fn test_exactly_once_without_seen_cache() {
    let resolver = Arc::new(CountingResolver::default());
    let collector = Collector::new(resolver.clone(), RefFilter::default(), false);

    collector.touch(1, 1);
    collector.touch(2, 1);
    collector.touch(1, 1);

    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    assert_eq!(collector.snapshot().len(), 2);
}

#[test]
fn test_reset_starts_a_new_interval() {
    let resolver = Arc::new(CountingResolver::default());
    let collector = collector_with(resolver.clone());

    collector.touch(1, 1);
    collector.add_uncleanable_ref("/work/config.toml");
    collector.reset();
    assert_eq!(collector.snapshot(), vec!["/work/config.toml"]);

    // The unit is accounted for again after a reset
    collector.touch(1, 1);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        collector.snapshot(),
        vec!["/work/config.toml", "/work/unit1.rs"]
    );
}

#[test]
fn test_touch_value() {
    struct Widget;
    impl Traced for Widget {
        fn unit_id(&self) -> UnitId {
            3
        }
    }

    let collector = collector_with(Arc::new(CountingResolver::default()));
    collector.touch_value(&Widget, 9);
    assert_eq!(collector.snapshot(), vec!["/work/unit3.rs"]);
}

#[test]
fn test_unresolvable_unit_is_dropped() {
    let collector = collector_with(Arc::new(UnitTable::new()));
    collector.touch(5, 0);
    assert!(collector.snapshot().is_empty());
}

#[test]
fn test_filtered_references() {
    let table = Arc::new(UnitTable::new());
    let kept = table.register("/work/src/lib.rs").unwrap();
    let wellknown = table.register("/home/u/.cargo/registry/src/x/lib.rs").unwrap();
    let collector = collector_with(table);

    collector.touch(kept, 0);
    collector.touch(wellknown, 1);
    assert_eq!(collector.snapshot(), vec!["/work/src/lib.rs"]);
}

#[test]
#[cfg(unix)]
fn test_add_file_filters_device_and_temp_files() {
    let collector = collector_with(Arc::new(UnitTable::new()));
    collector.add_file(Path::new("/dev/urandom"));
    collector.add_file(Path::new("/tmp/scratch"));
    collector.add_file(Path::new("/work/data.csv"));
    assert_eq!(collector.snapshot(), vec!["/work/data.csv"]);
}

#[test]
fn test_external_refs_are_not_filtered() {
    let collector = collector_with(Arc::new(UnitTable::new()));
    collector.add_external_refs(["/tmp/seeded", "/work/b", "/work/b"]);
    assert_eq!(collector.snapshot(), vec!["/tmp/seeded", "/work/b"]);
}

#[test]
fn test_concurrent_touches() {
    let resolver = Arc::new(CountingResolver::default());
    let collector = Arc::new(collector_with(resolver.clone()));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let collector = Arc::clone(&collector);
            thread::spawn(move || {
                for i in 0..1000u32 {
                    collector.touch(i % 64, i.wrapping_mul(31).wrapping_add(t));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(resolver.calls.load(Ordering::SeqCst), 64);
    assert_eq!(collector.snapshot().len(), 64);
}
