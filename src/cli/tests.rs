use std::path::{Path, PathBuf};

use clap::Parser;
use tempfile::TempDir;

use crate::cli::{Cli, Commands, normalize_path};

#[test]
fn test_cli_parsing() {
    let cli = Cli::parse_from(["cargo-muster", "muster"]);
    assert!(matches!(cli.command(), Commands::Muster { debug: false }));
    assert!(cli.global_opts().store_dir().is_none());
    assert!(cli.global_opts().config().is_none());
    assert!(cli.global_opts().options().is_none());
    assert_eq!(cli.global_opts().verbose(), 0);
    assert!(!cli.global_opts().quiet());
}

#[test]
fn test_verbose_flag() {
    let cli = Cli::parse_from(["cargo-muster", "-vv", "brig"]);
    assert_eq!(cli.global_opts().verbose(), 2);
    assert!(matches!(cli.command(), Commands::Brig));
}

#[test]
fn test_quiet_conflicts_with_verbose() {
    assert!(Cli::try_parse_from(["cargo-muster", "-q", "-v", "brig"]).is_err());
}

#[test]
fn test_debug_flag() {
    let cli = Cli::parse_from(["cargo-muster", "muster", "--debug"]);
    assert!(matches!(cli.command(), Commands::Muster { debug: true }));
}

#[test]
fn test_manifest_requires_unit() {
    assert!(Cli::try_parse_from(["cargo-muster", "manifest"]).is_err());

    let cli = Cli::parse_from(["cargo-muster", "manifest", "suite::tests.clz"]);
    match cli.command() {
        Commands::Manifest { unit } => assert_eq!(unit, "suite::tests.clz"),
        _ => panic!("expected manifest"),
    }
}

#[test]
fn test_options_flag() {
    let cli = Cli::parse_from([
        "cargo-muster",
        "-o",
        "force.all=true,cache.size=10",
        "muster",
    ]);
    assert_eq!(
        cli.global_opts().options(),
        Some("force.all=true,cache.size=10")
    );
}

#[test]
fn test_global_flag_positioning() {
    // Global flags can be placed anywhere
    let cli = Cli::parse_from(["cargo-muster", "bilge", "--store-dir", "deps"]);
    assert_eq!(cli.global_opts().store_dir(), Some(Path::new("deps")));
    assert!(matches!(cli.command(), Commands::Bilge));
}

#[test]
fn test_cargo_args_strip_subcommand_name() {
    let cli = Cli::try_parse_cargo_args(["cargo-muster", "muster", "brig"]).unwrap();
    assert!(matches!(cli.command(), Commands::Brig));

    let cli = Cli::try_parse_cargo_args(["cargo-muster", "muster", "muster", "--debug"]).unwrap();
    assert!(matches!(cli.command(), Commands::Muster { debug: true }));

    let cli = Cli::try_parse_cargo_args(["cargo-muster", "muster", "-v", "bilge"]).unwrap();
    assert_eq!(cli.global_opts().verbose(), 1);
    assert!(matches!(cli.command(), Commands::Bilge));
}

#[test]
fn test_direct_invocation_keeps_muster_command() {
    let cli = Cli::try_parse_cargo_args(["cargo-muster", "muster"]).unwrap();
    assert!(matches!(cli.command(), Commands::Muster { debug: false }));

    let cli = Cli::try_parse_cargo_args(["cargo-muster", "muster", "--debug"]).unwrap();
    assert!(matches!(cli.command(), Commands::Muster { debug: true }));

    let cli = Cli::try_parse_cargo_args(["cargo-muster", "brig"]).unwrap();
    assert!(matches!(cli.command(), Commands::Brig));

    assert!(Cli::try_parse_cargo_args(["cargo-muster", "muster", "manifest"]).is_err());
}

#[test]
fn test_cli_builder() {
    let cli = Cli::builder()
        .store_dir("custom/deps")
        .verbose(2)
        .quiet(false)
        .command(Commands::Brig)
        .build()
        .expect("Failed to build CLI");

    assert_eq!(cli.global_opts().store_dir(), Some(Path::new("custom/deps")));
    assert_eq!(cli.global_opts().verbose(), 2);
    assert!(!cli.global_opts().quiet());
    assert!(matches!(cli.command(), Commands::Brig));

    assert!(Cli::builder().verbose(1).build().is_err());
}

#[test]
fn test_load_config_store_dir_override() {
    let temp_dir = TempDir::new().unwrap();

    let cli = Cli::builder()
        .store_dir("deps/../store")
        .options("force.all=true")
        .command(Commands::Bilge)
        .build()
        .unwrap();
    let config = cli.global_opts().load_config(temp_dir.path()).unwrap();

    assert_eq!(config.root_dir, normalize_path(temp_dir.path().join("store")));
    assert!(config.force_all);
}

#[test]
fn test_load_config_rejects_bad_options() {
    let temp_dir = TempDir::new().unwrap();
    let cli = Cli::builder()
        .options("no-such-option")
        .command(Commands::Bilge)
        .build()
        .unwrap();
    assert!(cli.global_opts().load_config(temp_dir.path()).is_err());
}

#[test]
fn test_normalize_path() {
    let normalized = normalize_path("./deps/./run");
    assert!(normalized.is_absolute());
    assert!(!normalized.to_string_lossy().contains("/./"));

    let normalized = normalize_path("deps/../other/deps");
    assert!(normalized.is_absolute());
    assert!(normalized.ends_with("other/deps"));
    assert!(!normalized.to_string_lossy().contains(".."));

    let abs_path = if cfg!(windows) {
        PathBuf::from("C:\\Users\\test")
    } else {
        PathBuf::from("/home/test")
    };
    assert_eq!(normalize_path(&abs_path), abs_path);

    let normalized = normalize_path("./a/b/../c/./d/../e");
    assert!(normalized.ends_with("a/c/e"));
}
