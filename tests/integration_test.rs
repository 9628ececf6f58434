use std::process::Command;
use std::sync::Arc;

use assert_fs::TempDir;
use assert_fs::prelude::*;
use cargo_muster::analyzer::DependencyAnalyzer;
use cargo_muster::cli::{Cli, Commands};
use cargo_muster::collector::{Collector, UnitTable};
use cargo_muster::commands::execute_to;
use cargo_muster::config::{Config, STORE_DIR_NAME};
use cargo_muster::error::Result;
use cargo_muster::record::{DependencyRecord, DependencySet, UnitKey};
use cargo_muster::resolver::find_non_affected;
use cargo_muster::store::{Store, StoreFormat};
use predicates::prelude::*;

mod common;

use common::TempHomeGuard;

/// A project directory with a sandboxed HOME.
struct TestProject {
    dir: TempDir,
    home: TempHomeGuard,
}

impl TestProject {
    fn new() -> Self {
        let home = TempHomeGuard::new();
        Self {
            dir: TempDir::new().unwrap(),
            home,
        }
    }

    fn config(&self) -> Config {
        Config::load(self.dir.path()).unwrap()
    }

    fn file(&self, name: &str, content: &str) -> String {
        let child = self.dir.child(name);
        child.write_str(content).unwrap();
        child.path().to_string_lossy().into_owned()
    }

    /// Runs one interval of `owner` as a test harness would, in a fresh
    /// "process".
    fn run_unit(&self, owner: &str, refs: &[&String]) -> bool {
        let config = self.config();
        let units = Arc::new(UnitTable::new());
        let collector = Arc::new(Collector::from_config(&config, units.clone()).unwrap());
        let mut analyzer = DependencyAnalyzer::from_config(&config, collector.clone());

        let key = UnitKey::class(owner);
        let affected = analyzer.interval_begin(&key);
        for reference in refs {
            collector.add_external_refs([reference.as_str()]);
        }
        analyzer.interval_end(&key, false);
        analyzer.shutdown().unwrap();
        affected
    }

    fn run_cli(&self, command: Commands) -> Result<String> {
        let cli = Cli::builder().command(command).build()?;
        let mut out = Vec::new();
        execute_to(&cli, Some(self.dir.path()), &mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

#[test]
fn test_unknown_unit_runs() {
    let project = TestProject::new();
    let src = project.file("src/lib.rs", "pub fn f() {}");
    assert!(project.run_unit("T1", &[&src]));
}

#[test]
fn test_unit_reruns_only_after_change() {
    let project = TestProject::new();
    let src = project.file("src/lib.rs", "pub fn f() {}");

    assert!(project.run_unit("crate::tests", &[&src]));
    assert!(!project.run_unit("crate::tests", &[&src]));

    project.file("src/lib.rs", "pub fn f() { todo!() }");
    assert!(project.run_unit("crate::tests", &[&src]));
    assert!(!project.run_unit("crate::tests", &[&src]));
}

#[test]
fn test_prefix_format_round_trip_on_disk() {
    let project = TestProject::new();
    let store = Store::new(StoreFormat::Prefix);
    let dir = project.dir.child(STORE_DIR_NAME);
    let set: DependencySet = [
        DependencyRecord::new("/p/q/X", "hA"),
        DependencyRecord::new("/p/q/Y", "hB"),
    ]
    .into_iter()
    .collect();

    store.save(dir.path(), &UnitKey::class("suite"), &set).unwrap();
    dir.child("suite.clz")
        .assert(predicate::str::starts_with("# 4\n/p/q\n"));
    assert_eq!(store.load(dir.path(), &UnitKey::class("suite")), set);
}

#[test]
fn test_overlong_unit_name_round_trip() {
    let project = TestProject::new();
    let store = Store::default();
    let dir = project.dir.child(STORE_DIR_NAME);
    let key = UnitKey::method("suite::params", "case_".repeat(80));
    let set: DependencySet = [DependencyRecord::new("/src/lib.rs", "1")]
        .into_iter()
        .collect();

    store.save(dir.path(), &key, &set).unwrap();
    assert_eq!(store.load(dir.path(), &key), set);
}

#[test]
fn test_find_non_affected_after_one_change() {
    let project = TestProject::new();
    let a = project.file("src/a.rs", "a");
    let b = project.file("src/b.rs", "b");
    let c = project.file("src/c.rs", "c");
    project.run_unit("suite::gamma", &[&c]);
    project.run_unit("suite::beta", &[&b]);
    project.run_unit("suite::alpha", &[&a, &b]);

    project.file("src/c.rs", "changed");

    let config = project.config();
    assert_eq!(
        find_non_affected(&config.root_dir, &config),
        vec!["suite::alpha", "suite::beta"]
    );
}

#[test]
fn test_muster_command_output() {
    let project = TestProject::new();
    let a = project.file("src/a.rs", "a");
    let b = project.file("src/b.rs", "b");
    project.run_unit("suite::a", &[&a]);
    project.run_unit("suite::b", &[&b]);
    project.file("src/b.rs", "changed");

    let output = project.run_cli(Commands::Muster { debug: false }).unwrap();
    assert_eq!(output, "suite::a\n");

    let output = project.run_cli(Commands::Muster { debug: true }).unwrap();
    assert!(predicate::str::contains("AFFECTED:\nsuite::b\n").eval(&output));
    assert!(predicate::str::ends_with("NONAFFECTED:\nsuite::a\n").eval(&output));

    let output = project
        .run_cli(Commands::Manifest {
            unit: "suite::b.clz".to_string(),
        })
        .unwrap();
    assert!(predicate::str::starts_with("changed ").eval(&output));
}

#[test]
fn test_project_config_file_is_honored() {
    let project = TestProject::new();
    let a = project.file("src/a.rs", "a");
    project.run_unit("suite::a", &[&a]);

    project
        .dir
        .child(".muster.toml")
        .write_str("force-all = true\n")
        .unwrap();
    assert_eq!(project.run_cli(Commands::Muster { debug: false }).unwrap(), "");
}

#[test]
fn test_home_config_is_layered_under_project_config() {
    let project = TestProject::new();
    std::fs::write(
        project.home.home().join(".muster.toml"),
        "root-dir = \"deps\"\nforce-all = true\n",
    )
    .unwrap();
    project
        .dir
        .child(".muster.toml")
        .write_str("force-all = false\n")
        .unwrap();

    let config = project.config();
    assert_eq!(config.root_dir, project.dir.path().join("deps"));
    assert!(!config.force_all);
}

#[test]
fn test_bilge_command_clears_store() {
    let project = TestProject::new();
    let a = project.file("src/a.rs", "a");
    project.run_unit("suite::a", &[&a]);

    let store = project.dir.child(STORE_DIR_NAME);
    store.assert(predicate::path::is_dir());
    project.run_cli(Commands::Bilge).unwrap();
    store.assert(predicate::path::missing());

    // Everything runs again
    assert!(project.run_unit("suite::a", &[&a]));
}

#[test]
fn test_binary_reports_non_affected_owners() {
    let project = TestProject::new();
    let a = project.file("src/a.rs", "a");
    project.run_unit("suite::a", &[&a]);

    let output = Command::new(env!("CARGO_BIN_EXE_cargo-muster"))
        .args(["muster", "muster", "--store-dir"])
        .arg(project.dir.child(STORE_DIR_NAME).path())
        .current_dir(project.dir.path())
        .env("HOME", project.home.home())
        .env_remove("RUST_LOG")
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "suite::a\n");
}

#[test]
fn test_binary_run_directly_keeps_muster_command() {
    let project = TestProject::new();
    let a = project.file("src/a.rs", "a");
    project.run_unit("suite::a", &[&a]);

    let output = Command::new(env!("CARGO_BIN_EXE_cargo-muster"))
        .args(["muster", "--store-dir"])
        .arg(project.dir.child(STORE_DIR_NAME).path())
        .current_dir(project.dir.path())
        .env("HOME", project.home.home())
        .env_remove("RUST_LOG")
        .env_remove("CARGO_MUSTER_DEBUG")
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "suite::a\n");
}

#[test]
fn test_binary_reports_bad_options() {
    let project = TestProject::new();

    let output = Command::new(env!("CARGO_BIN_EXE_cargo-muster"))
        .args(["-o", "not-an-option", "brig"])
        .current_dir(project.dir.path())
        .env("HOME", project.home.home())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(
        predicate::str::contains("Incorrect option").eval(&String::from_utf8_lossy(&output.stderr))
    );
}
