//! Read-only masking of sensitive kernel interfaces.
//!
//! After the mount namespace is set up, paths like `proc/sys` are
//! bind-mounted over themselves and remounted read-only so a root process
//! inside the container cannot poke the host through them.

use std::path::Path;

use nix::mount::{mount, MsFlags};
use vessel_common::error::{Result, VesselError};

/// Paths masked for first-boot containers, relative to the new root.
pub const FIRST_BOOT_PATHS: [&str; 4] =
    ["proc/sys", "proc/sysrq-trigger", "proc/irq", "proc/bus"];

/// Paths masked for processes joining an existing mount namespace; `sys`
/// is included here because the joined namespace kept its sysfs writable.
pub const JOIN_PATHS: [&str; 5] =
    ["proc/sys", "proc/sysrq-trigger", "proc/irq", "proc/bus", "sys"];

/// Remounts each of `paths` (relative to `/`) read-only.
///
/// Paths that do not exist in this container are skipped.
///
/// # Errors
///
/// Returns an error if a bind or remount syscall fails.
pub fn restrict(paths: &[&str]) -> Result<()> {
    for relative in paths {
        let target = Path::new("/").join(relative);
        if !target.exists() {
            continue;
        }
        remount_readonly(&target)?;
        tracing::debug!(path = %target.display(), "restricted");
    }
    Ok(())
}

fn remount_readonly(target: &Path) -> Result<()> {
    let unexpected = |errno: nix::errno::Errno| VesselError::Unexpected {
        syscall: "mount",
        errno: errno as i32,
    };
    mount(
        Some(target),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(unexpected)?;
    mount(
        Some(target),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        None::<&str>,
    )
    .map_err(unexpected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_paths_are_first_boot_paths_plus_sys() {
        assert_eq!(&JOIN_PATHS[..FIRST_BOOT_PATHS.len()], &FIRST_BOOT_PATHS);
        assert_eq!(JOIN_PATHS[FIRST_BOOT_PATHS.len()], "sys");
    }

    #[test]
    fn restrict_skips_absent_paths() {
        restrict(&["nonexistent/vessel/path"]).expect("absent paths are skipped");
    }
}
