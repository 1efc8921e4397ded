#![cfg(unix)]

use std::fs;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn write_project(root: &Path, files: usize, lines: usize) {
    fs::create_dir_all(root).expect("mkdir should work");
    for n in 0..files {
        let mut source = format!("pub fn entry_{n}() {{}}\n");
        for line in 0..lines {
            source.push_str(&format!("// filler {line} keeps the scanner busy\n"));
        }
        fs::write(root.join(format!("f{n}.rs")), source).expect("write should work");
    }
}

fn has_worker_config(runtime_dir: &Path) -> bool {
    fs::read_dir(runtime_dir)
        .map(|entries| {
            entries.flatten().any(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.starts_with("config_") && name.ends_with(".json")
            })
        })
        .unwrap_or(false)
}

fn wait_with_deadline(child: &mut std::process::Child, deadline: Duration) -> ExitStatus {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("try_wait should work") {
            return status;
        }
        if started.elapsed() > deadline {
            let _ = child.kill();
            panic!("indexing did not stop within {deadline:?}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn ctrl_c_on_the_terminal_group_lets_workers_finish_their_file() {
    let dir = tempfile::tempdir().expect("tempdir should work");
    let project = dir.path().join("project");
    let runtime_dir = dir.path().join("runtime");
    write_project(&project, 32, 40_000);

    let mut child = Command::new(env!("CARGO_BIN_EXE_fanout"))
        .arg("index")
        .arg(&project)
        .args(["--workers", "2", "--json"])
        .arg("--store")
        .arg(dir.path().join("store.bin"))
        .env("HOME", dir.path())
        .env("FANOUT_RUNTIME_DIR", &runtime_dir)
        .env_remove("FANOUT_WORKERS")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        // A group of its own stands in for the terminal's foreground group.
        .process_group(0)
        .spawn()
        .expect("fanout should start");

    let started = Instant::now();
    while !has_worker_config(&runtime_dir) {
        assert!(
            started.elapsed() < Duration::from_secs(60),
            "workers were never launched"
        );
        thread::sleep(Duration::from_millis(10));
    }
    thread::sleep(Duration::from_millis(500));

    let group = format!("-{}", child.id());
    let sent = Command::new("kill")
        .args(["-INT", "--", &group])
        .status()
        .expect("kill should run");
    assert!(sent.success());

    let status = wait_with_deadline(&mut child, Duration::from_secs(120));
    assert!(status.success(), "coordinator exited with {status}");

    let output = child.wait_with_output().expect("output should be readable");
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("report should be JSON");

    assert_eq!(report["interrupted"], true);
    assert_eq!(report["crashed_files"], serde_json::json!([]));
    assert_eq!(report["in_flight_files"], serde_json::json!([]));
    let queued = report["files_queued"].as_u64().expect("files_queued");
    let merged = report["files_merged"].as_u64().expect("files_merged");
    let remaining = report["remaining"].as_u64().expect("remaining");
    assert_eq!(queued, 32);
    assert_eq!(merged + remaining, queued);
    assert!(remaining > 0);
}
