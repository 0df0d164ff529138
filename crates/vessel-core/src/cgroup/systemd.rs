//! Systemd-styled cgroup driver.
//!
//! On systemd hosts container cgroups live as transient scopes under a
//! slice, so the paths other tooling expects (`systemd-cgls`, `machinectl`)
//! resolve. The mechanics are the same cgroupfs writes as the plain driver;
//! only the naming differs.

use std::path::{Path, PathBuf};

use vessel_common::config::CgroupSpec;
use vessel_common::constants::{CGROUP_FS_ROOT, SYSTEMD_RUN_DIR};
use vessel_common::error::Result;

use super::{fs, CgroupDriver, CgroupPaths};

/// Slice under which container scopes are created.
pub const DEFAULT_SLICE: &str = "system.slice";

/// Returns whether the host runs systemd as PID 1.
#[must_use]
pub fn is_running() -> bool {
    Path::new(SYSTEMD_RUN_DIR).is_dir()
}

/// Driver producing `<slice>/vessel-<name>.scope` paths.
#[derive(Debug, Clone)]
pub struct SystemdDriver {
    root: PathBuf,
}

impl Default for SystemdDriver {
    fn default() -> Self {
        Self {
            root: PathBuf::from(CGROUP_FS_ROOT),
        }
    }
}

impl SystemdDriver {
    /// Creates a driver rooted at a non-standard cgroupfs mount.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scoped(spec: &CgroupSpec) -> CgroupSpec {
        let slice = if spec.parent.is_empty() {
            DEFAULT_SLICE.to_string()
        } else {
            spec.parent.clone()
        };
        CgroupSpec {
            name: format!("vessel-{}.scope", spec.name),
            parent: slice,
            ..spec.clone()
        }
    }
}

impl CgroupDriver for SystemdDriver {
    fn apply(&self, spec: &CgroupSpec, pid: i32) -> Result<CgroupPaths> {
        let scoped = Self::scoped(spec);
        fs::FsDriver::with_root(&self.root).apply(&scoped, pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_paths_follow_slice_naming() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("cpu")).expect("cpu hierarchy");

        let spec = CgroupSpec {
            name: "web".into(),
            cpu_shares: Some(128),
            ..CgroupSpec::default()
        };
        let driver = SystemdDriver::with_root(dir.path());
        let paths = driver.apply(&spec, 321).expect("apply");

        let expected = dir.path().join("cpu/system.slice/vessel-web.scope");
        assert_eq!(paths.get("cpu"), Some(&expected));
        assert!(expected.join("cgroup.procs").exists());
    }

    #[test]
    fn explicit_parent_overrides_default_slice() {
        let spec = CgroupSpec {
            name: "db".into(),
            parent: "user.slice".into(),
            ..CgroupSpec::default()
        };
        let scoped = SystemdDriver::scoped(&spec);
        assert_eq!(scoped.parent, "user.slice");
        assert_eq!(scoped.name, "vessel-db.scope");
    }
}
