//! Plain cgroupfs driver.
//!
//! Works directly against the per-controller hierarchies mounted under
//! `/sys/fs/cgroup/<controller>`. Controllers whose hierarchy is not
//! mounted are skipped, so a host without `cpuset` still runs containers.

use std::path::{Path, PathBuf};

use vessel_common::config::CgroupSpec;
use vessel_common::constants::CGROUP_FS_ROOT;
use vessel_common::error::{Result, VesselError};

use super::{CgroupDriver, CgroupPaths};

/// Controllers this driver manages.
pub const CONTROLLERS: [&str; 3] = ["cpu", "memory", "cpuset"];

/// Driver for hosts without systemd, or for tests against a scratch root.
#[derive(Debug, Clone)]
pub struct FsDriver {
    root: PathBuf,
}

impl Default for FsDriver {
    fn default() -> Self {
        Self {
            root: PathBuf::from(CGROUP_FS_ROOT),
        }
    }
}

impl FsDriver {
    /// Creates a driver rooted at a non-standard cgroupfs mount.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn controller_dir(&self, controller: &str, spec: &CgroupSpec) -> PathBuf {
        let mut dir = self.root.join(controller);
        if !spec.parent.is_empty() {
            dir.push(&spec.parent);
        }
        dir.push(&spec.name);
        dir
    }
}

impl CgroupDriver for FsDriver {
    fn apply(&self, spec: &CgroupSpec, pid: i32) -> Result<CgroupPaths> {
        let mut paths = CgroupPaths::new();
        for controller in CONTROLLERS {
            if !self.root.join(controller).is_dir() {
                tracing::debug!(controller, "controller hierarchy absent, skipping");
                continue;
            }
            let dir = self.controller_dir(controller, spec);
            std::fs::create_dir_all(&dir).map_err(|err| failed(controller, &dir, &err))?;
            write_limits(controller, &dir, spec)?;
            attach(controller, &dir, pid)?;
            paths.insert(controller.to_string(), dir);
        }
        Ok(paths)
    }
}

fn write_limits(controller: &str, dir: &Path, spec: &CgroupSpec) -> Result<()> {
    match controller {
        "cpu" => {
            if let Some(shares) = spec.cpu_shares {
                write_file(controller, &dir.join("cpu.shares"), &shares.to_string())?;
            }
        }
        "memory" => {
            if let Some(memory) = spec.memory {
                write_file(
                    controller,
                    &dir.join("memory.limit_in_bytes"),
                    &memory.to_string(),
                )?;
            }
            if let Some(swap) = spec.memory_swap {
                write_file(
                    controller,
                    &dir.join("memory.memsw.limit_in_bytes"),
                    &swap.to_string(),
                )?;
            }
        }
        "cpuset" => init_cpuset(dir, spec)?,
        _ => {}
    }
    Ok(())
}

fn attach(controller: &str, dir: &Path, pid: i32) -> Result<()> {
    write_file(controller, &dir.join("cgroup.procs"), &pid.to_string())
}

// A fresh cpuset cgroup refuses members until cpus and mems are populated.
// Unset values are inherited from the nearest ancestor that has them; a
// freshly created parent directory starts out empty too.
fn init_cpuset(dir: &Path, spec: &CgroupSpec) -> Result<()> {
    for (file, configured) in [("cpuset.cpus", spec.cpuset_cpus.as_deref()), ("cpuset.mems", None)]
    {
        let value = match configured {
            Some(value) => value.to_string(),
            None => inherited_cpuset_value(dir, file)?,
        };
        if !value.is_empty() {
            write_file("cpuset", &dir.join(file), &value)?;
        }
    }
    Ok(())
}

fn inherited_cpuset_value(dir: &Path, file: &str) -> Result<String> {
    let mut ancestor = dir.parent();
    while let Some(current) = ancestor {
        let path = current.join(file);
        match std::fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => {
                return Ok(content.trim().to_string());
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => break,
            Err(err) => return Err(failed("cpuset", &path, &err)),
        }
        ancestor = current.parent();
    }
    Ok(String::new())
}

fn write_file(controller: &str, path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value).map_err(|err| failed(controller, path, &err))
}

fn failed(controller: &str, path: &Path, err: &std::io::Error) -> VesselError {
    VesselError::CgroupFailed {
        controller: controller.to_string(),
        message: format!("{}: {err}", path.display()),
    }
}
