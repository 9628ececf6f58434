use crate::record::{DependencyRecord, DependencySet, Granularity, UnitKey};

#[test]
fn test_dependency_set_operations() {
    let mut set = DependencySet::new();
    assert!(set.is_empty());

    set.insert(DependencyRecord::new("/src/b.rs", "2"));
    set.insert(DependencyRecord::new("/src/a.rs", "1"));
    assert_eq!(set.len(), 2);
    assert!(set.contains("/src/a.rs"));
    assert_eq!(set.digest("/src/b.rs"), Some("2"));

    // Iteration is ordered by reference
    let refs: Vec<&str> = set.references().collect();
    assert_eq!(refs, vec!["/src/a.rs", "/src/b.rs"]);
}

#[test]
fn test_dependency_set_unique_by_reference() {
    let mut set = DependencySet::new();
    assert_eq!(set.insert(DependencyRecord::new("r1", "h1")), None);
    assert_eq!(
        set.insert(DependencyRecord::new("r1", "h2")),
        Some("h1".to_string())
    );
    assert_eq!(set.len(), 1);
    assert_eq!(set.digest("r1"), Some("h2"));
}

#[test]
fn test_unit_key_full_name() {
    assert_eq!(UnitKey::class("suite::tests").full_name(), "suite::tests.clz");
    assert_eq!(UnitKey::run("DEFAULT").full_name(), "DEFAULT.cov");
    assert_eq!(
        UnitKey::method("suite::tests", "adds").full_name(),
        "suite::tests.adds"
    );
}

#[test]
fn test_unit_key_from_file_name() {
    let key = UnitKey::from_file_name("a.b.C.clz").unwrap();
    assert_eq!(key.owner(), "a.b.C");
    assert_eq!(key.granularity(), &Granularity::Class);

    let key = UnitKey::from_file_name("DEFAULT.cov").unwrap();
    assert_eq!(key.granularity(), &Granularity::Run);

    let key = UnitKey::from_file_name("a.b.C.testAdd").unwrap();
    assert_eq!(key.owner(), "a.b.C");
    assert_eq!(key.granularity(), &Granularity::Method("testAdd".into()));

    assert!(UnitKey::from_file_name("1234567890").is_none());
    assert!(UnitKey::from_file_name(".hidden").is_none());
}
