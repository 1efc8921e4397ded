use std::path::PathBuf;

use fanout_cli::{Commands, parse_from};

#[test]
fn index_flags_are_parsed() {
    let cli = parse_from([
        "fanout",
        "index",
        "proj",
        "--workers",
        "4",
        "--serial",
        "gen/**",
        "--serial",
        "big.rs",
        "--retry-crashed",
        "--json",
    ])
    .expect("parse should work");

    let Commands::Index(args) = cli.command else {
        panic!("expected the index command");
    };
    assert_eq!(args.path, Some(PathBuf::from("proj")));
    assert_eq!(args.workers, Some(4));
    assert_eq!(args.serial_globs, vec!["gen/**", "big.rs"]);
    assert!(args.retry_crashed);
    assert!(args.json);
    assert!(!args.in_process);
}

#[test]
fn worker_command_takes_what_the_launcher_passes() {
    let cli = parse_from([
        "fanout",
        "worker",
        "--instance",
        "00ff",
        "--worker-id",
        "3",
        "--runtime-dir",
        "/tmp/run",
        "--config",
        "/tmp/run/config_00ff.json",
    ])
    .expect("parse should work");

    let Commands::Worker(args) = cli.command else {
        panic!("expected the worker command");
    };
    assert_eq!(args.worker_id, 3);
    assert_eq!(args.instance, "00ff");
    assert_eq!(args.config, PathBuf::from("/tmp/run/config_00ff.json"));
}

#[test]
fn worker_id_must_be_numeric() {
    let parsed = parse_from([
        "fanout",
        "worker",
        "--instance",
        "x",
        "--worker-id",
        "one",
        "--runtime-dir",
        "r",
        "--config",
        "c",
    ]);
    assert!(parsed.is_err());
}
