//! End-to-end tests driving the built `vsl` binary.
//!
//! Namespace creation, pivot/chroot, and cgroup placement need root, so
//! every privileged scenario skips itself on unprivileged runners and the
//! remaining tests cover the failure paths that need no privilege.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use vessel_common::config::{ContainerConfig, IdMap};
use vessel_common::state::ContainerState;

const VSL: &str = env!("CARGO_BIN_EXE_vsl");

fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Minimal host-rootfs config: new mount + UTS namespaces, chroot into the
/// host root so the host's own binaries stay runnable.
fn host_rootfs_config() -> ContainerConfig {
    let mut config = ContainerConfig {
        rootfs: "/".into(),
        ..ContainerConfig::default()
    };
    config.namespaces.insert("NEWNS".into(), true);
    config.namespaces.insert("NEWUTS".into(), true);
    config.mounts.no_pivot_root = true;
    config
}

fn write_config(dir: &Path, config: &ContainerConfig) -> std::path::PathBuf {
    let path = dir.join("container.json");
    std::fs::write(&path, serde_json::to_string_pretty(config).expect("json")).expect("config");
    path
}

fn run_vsl(config_path: &Path, data_path: &Path, args: &[&str]) -> std::process::Output {
    Command::new(VSL)
        .arg("run")
        .arg(config_path)
        .arg("--data-path")
        .arg(data_path)
        .arg("--")
        .args(args)
        .output()
        .expect("spawn vsl run")
}

// ── First boot ───────────────────────────────────────────────────────

#[test]
fn boot_minimal_container_exits_zero_and_cleans_state() {
    if !is_root() {
        eprintln!("skipping: requires root");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = write_config(dir.path(), &host_rootfs_config());

    let output = run_vsl(&config_path, dir.path(), &["/bin/true"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(
        !dir.path().join("state.json").exists(),
        "state.json must be gone after exec returns"
    );
}

#[test]
fn boot_passes_user_exit_code_through() {
    if !is_root() {
        eprintln!("skipping: requires root");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = write_config(dir.path(), &host_rootfs_config());

    let output = run_vsl(&config_path, dir.path(), &["/bin/sh", "-c", "exit 7"]);
    assert_eq!(output.status.code(), Some(7));
}

#[test]
fn boot_sets_container_hostname() {
    if !is_root() {
        eprintln!("skipping: requires root");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = host_rootfs_config();
    config.hostname = "vessel-test".into();
    let config_path = write_config(dir.path(), &config);

    let output = run_vsl(&config_path, dir.path(), &["/bin/hostname"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "vessel-test"
    );
}

#[test]
fn boot_with_user_namespace_maps_root() {
    if !is_root() {
        eprintln!("skipping: requires root");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = host_rootfs_config();
    config.namespaces.insert("NEWUSER".into(), true);
    config.namespaces.insert("NEWPID".into(), true);
    let identity = IdMap {
        container_id: 0,
        host_id: 0,
        size: 65_536,
    };
    config.uid_mappings.push(identity);
    config.gid_mappings.push(identity);
    let config_path = write_config(dir.path(), &config);

    let output = run_vsl(
        &config_path,
        dir.path(),
        &["/bin/sh", "-c", "cat /proc/self/uid_map"],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let fields: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .split_ascii_whitespace()
        .map(ToString::to_string)
        .collect();
    assert_eq!(fields, ["0", "0", "65536"]);
}

#[test]
fn boot_failure_reports_child_init_error() {
    if !is_root() {
        eprintln!("skipping: requires root");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = host_rootfs_config();
    config.rootfs = "/definitely/not/a/rootfs".into();
    let config_path = write_config(dir.path(), &config);

    let output = run_vsl(&config_path, dir.path(), &["/bin/true"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("container init failed"),
        "stderr: {stderr}"
    );
    assert!(!dir.path().join("state.json").exists());
}

#[test]
fn boot_applies_cgroup_limits_when_controllers_exist() {
    if !is_root() {
        eprintln!("skipping: requires root");
        return;
    }
    if !Path::new("/sys/fs/cgroup/cpu").is_dir() {
        eprintln!("skipping: no cgroup v1 cpu hierarchy");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = host_rootfs_config();
    config.cgroups = Some(vessel_common::config::CgroupSpec {
        name: "vessel-e2e".into(),
        parent: "vessel".into(),
        cpu_shares: Some(512),
        ..vessel_common::config::CgroupSpec::default()
    });
    let config_path = write_config(dir.path(), &config);

    let output = run_vsl(
        &config_path,
        dir.path(),
        &["/bin/cat", "/sys/fs/cgroup/cpu/vessel/vessel-e2e/cpu.shares"],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "512");
    assert!(
        !Path::new("/sys/fs/cgroup/cpu/vessel/vessel-e2e").exists(),
        "cgroup dir must be removed after exit"
    );
}

// ── Join ─────────────────────────────────────────────────────────────

#[test]
fn join_runs_command_inside_live_container() {
    if !is_root() {
        eprintln!("skipping: requires root");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = host_rootfs_config();
    config.hostname = "vessel-join".into();
    let config_path = write_config(dir.path(), &config);

    let mut container = Command::new(VSL)
        .arg("run")
        .arg(&config_path)
        .arg("--data-path")
        .arg(dir.path())
        .arg("--")
        .args(["/bin/sleep", "10"])
        .spawn()
        .expect("spawn container");

    // The state file appears just before the child is released.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !dir.path().join("state.json").exists() {
        assert!(Instant::now() < deadline, "state.json never appeared");
        std::thread::sleep(Duration::from_millis(50));
    }

    let output = Command::new(VSL)
        .arg("exec")
        .arg("--config")
        .arg(&config_path)
        .arg("--data-path")
        .arg(dir.path())
        .arg("--")
        .args(["/bin/hostname"])
        .output()
        .expect("spawn vsl exec");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "vessel-join"
    );

    let _ = container.kill();
    let _ = container.wait();
}

#[test]
fn join_dead_container_with_cgroups_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = write_config(dir.path(), &host_rootfs_config());

    // A state file whose init is long gone and whose cgroup paths point
    // nowhere: entering must fail before any command runs.
    let mut state = ContainerState {
        init_pid: 4_190_001,
        init_start_time: "1".into(),
        ..ContainerState::default()
    };
    state
        .cgroup_paths
        .insert("cpu".into(), "/nonexistent/vessel/cpu".into());
    std::fs::write(
        dir.path().join("state.json"),
        serde_json::to_string(&state).expect("json"),
    )
    .expect("state");

    let output = Command::new(VSL)
        .arg("exec")
        .arg("--config")
        .arg(&config_path)
        .arg("--data-path")
        .arg(dir.path())
        .arg("--")
        .args(["/bin/true"])
        .output()
        .expect("spawn vsl exec");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cgroup"), "stderr: {stderr}");
}

// ── Failure paths that need no privilege ─────────────────────────────

#[test]
fn six_uid_mappings_fail_without_running_anything() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = host_rootfs_config();
    config.namespaces.insert("NEWUSER".into(), true);
    for i in 0..6 {
        config.uid_mappings.push(IdMap {
            container_id: i,
            host_id: 1000 + i,
            size: 1,
        });
    }
    let config_path = write_config(dir.path(), &config);

    let output = run_vsl(&config_path, dir.path(), &["/bin/true"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("id mappings"), "stderr: {stderr}");
    assert!(!dir.path().join("state.json").exists());
}

#[test]
fn exec_without_state_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = write_config(dir.path(), &host_rootfs_config());

    let output = Command::new(VSL)
        .arg("exec")
        .arg("--config")
        .arg(&config_path)
        .arg("--data-path")
        .arg(dir.path())
        .arg("--")
        .args(["/bin/true"])
        .output()
        .expect("spawn vsl exec");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no container"), "stderr: {stderr}");
}

#[test]
fn run_with_missing_config_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_vsl(&dir.path().join("absent.json"), dir.path(), &["/bin/true"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("container config"), "stderr: {stderr}");
}

#[test]
fn run_with_corrupt_state_dir_still_boots_fresh() {
    if !is_root() {
        eprintln!("skipping: requires root");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = write_config(dir.path(), &host_rootfs_config());
    // A stale state file from a previous run is simply overwritten.
    std::fs::write(dir.path().join("state.json"), "{}").expect("stale state");

    let output = run_vsl(&config_path, dir.path(), &["/bin/true"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}
