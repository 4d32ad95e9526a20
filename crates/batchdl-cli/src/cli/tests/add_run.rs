//! Tests for add and run subcommands.

use super::parse;
use crate::cli::commands::add::{build_request, destination_for};
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use std::path::{Path, PathBuf};

#[test]
fn cli_parse_add() {
    match parse(&[
        "batchdl",
        "add",
        "Maps",
        "https://example.com/a.bin",
        "https://example.com/b.bin",
    ]) {
        CliCommand::Add {
            title,
            urls,
            dir,
            id,
        } => {
            assert_eq!(title, "Maps");
            assert_eq!(urls.len(), 2);
            assert!(dir.is_none());
            assert!(id.is_none());
        }
        _ => panic!("expected Add"),
    }
}

#[test]
fn cli_parse_add_dir_and_id() {
    match parse(&[
        "batchdl",
        "add",
        "Maps",
        "https://example.com/x",
        "--dir",
        "/tmp",
        "--id",
        "maps-1",
    ]) {
        CliCommand::Add { dir, id, .. } => {
            assert_eq!(dir.as_deref(), Some(Path::new("/tmp")));
            assert_eq!(id.as_deref(), Some("maps-1"));
        }
        _ => panic!("expected Add with --dir"),
    }
}

#[test]
fn cli_add_requires_a_url() {
    assert!(Cli::try_parse_from(["batchdl", "add", "Maps"]).is_err());
}

#[test]
fn cli_parse_run() {
    match parse(&["batchdl", "run"]) {
        CliCommand::Run { concurrent, files } => {
            assert!(!concurrent);
            assert_eq!(files, None);
        }
        _ => panic!("expected Run"),
    }
    match parse(&["batchdl", "run", "--concurrent", "--files", "4"]) {
        CliCommand::Run { concurrent, files } => {
            assert!(concurrent);
            assert_eq!(files, Some(4));
        }
        _ => panic!("expected Run --concurrent"),
    }
}

#[test]
fn destination_is_last_path_segment() {
    assert_eq!(
        destination_for("https://example.com/dir/file.iso?x=1", 0),
        PathBuf::from("file.iso")
    );
    assert_eq!(destination_for("https://example.com/", 2), PathBuf::from("download-3"));
    assert_eq!(destination_for("not a url", 0), PathBuf::from("download-1"));
}

#[test]
fn repeated_names_are_disambiguated() {
    let urls = vec![
        "https://a.example/data.bin".to_string(),
        "https://b.example/data.bin".to_string(),
    ];
    let request = build_request("Mirror", Path::new("/dl"), &urls, None);
    assert!(request.validate().is_ok());
    assert_eq!(request.files[0].destination, PathBuf::from("data.bin"));
    assert_eq!(request.files[1].destination, PathBuf::from("2-data.bin"));
}
