//! Argument parsing tests for the ragnar CLI.

use clap::Parser;
use ragnar_cli::{Cli, Commands};

#[test]
fn test_global_flags_and_subcommand() {
    let cli = Cli::try_parse_from(["ragnar", "--repo", "/tmp/project", "status"]).unwrap();
    assert_eq!(cli.repo.as_deref(), Some(std::path::Path::new("/tmp/project")));
    assert_eq!(cli.command, Commands::Status);
}

#[test]
fn test_defaults_for_chain_and_hierarchy() {
    let cli = Cli::try_parse_from(["ragnar", "chain", "repo:a.py:foo"]).unwrap();
    assert_eq!(
        cli.command,
        Commands::Chain {
            id: "repo:a.py:foo".to_string(),
            depth: 5,
            direction: "outgoing".to_string(),
        }
    );

    let cli = Cli::try_parse_from(["ragnar", "hierarchy", "repo:a.py:A"]).unwrap();
    assert!(matches!(cli.command, Commands::Hierarchy { ref direction, .. } if direction == "both"));
}

#[test]
fn test_init_config_and_search() {
    let cli = Cli::try_parse_from(["ragnar", "init-config", "--force"]).unwrap();
    assert_eq!(cli.command, Commands::InitConfig { output: None, force: true });

    let cli = Cli::try_parse_from(["ragnar", "search", "parse imports", "-k", "3", "--path", "src/"]).unwrap();
    assert!(matches!(cli.command, Commands::Search { limit: 3, ref path, .. } if path.as_deref() == Some("src/")));
}

#[test]
fn test_missing_argument_is_rejected() {
    assert!(Cli::try_parse_from(["ragnar", "calls"]).is_err());
    assert!(Cli::try_parse_from(["ragnar", "paths", "only-one"]).is_err());
}
