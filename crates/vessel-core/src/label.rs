//! LSM label application (AppArmor profiles and SELinux process labels).
//!
//! Thin seams over the kernel's `/proc/self/attr` interface; the label
//! text itself comes from the container configuration, and both calls are
//! no-ops when their input is empty. These write per-thread state, so the
//! finalizer pins its OS thread before calling in here.

use std::path::Path;
use std::sync::OnceLock;

use vessel_common::error::{Result, VesselError};

const APPARMOR_EXEC_ATTR: &str = "/proc/self/attr/apparmor/exec";
const LEGACY_EXEC_ATTR: &str = "/proc/self/attr/exec";

static SELINUX_ENABLED: OnceLock<bool> = OnceLock::new();

/// Probes the host's label support once per process.
pub fn init() {
    let enabled = *SELINUX_ENABLED.get_or_init(|| Path::new("/sys/fs/selinux/enforce").exists());
    tracing::debug!(selinux = enabled, "label subsystem initialized");
}

/// Schedules `profile` to confine the next `execve`.
///
/// # Errors
///
/// Returns an error if the attribute file cannot be written.
pub fn apply_apparmor_profile(profile: &str) -> Result<()> {
    if profile.is_empty() {
        return Ok(());
    }
    let attr = if Path::new(APPARMOR_EXEC_ATTR).exists() {
        APPARMOR_EXEC_ATTR
    } else {
        LEGACY_EXEC_ATTR
    };
    std::fs::write(attr, format!("exec {profile}")).map_err(|err| VesselError::Io {
        path: attr.into(),
        source: err,
    })?;
    tracing::debug!(profile, "apparmor exec profile set");
    Ok(())
}

/// Schedules the SELinux `label` for the next `execve`.
///
/// Silently succeeds when SELinux is not enabled on the host.
///
/// # Errors
///
/// Returns an error if the attribute file cannot be written.
pub fn set_process_label(label: &str) -> Result<()> {
    if label.is_empty() {
        return Ok(());
    }
    if !SELINUX_ENABLED.get_or_init(|| Path::new("/sys/fs/selinux/enforce").exists()) {
        return Ok(());
    }
    std::fs::write(LEGACY_EXEC_ATTR, label).map_err(|err| VesselError::Io {
        path: LEGACY_EXEC_ATTR.into(),
        source: err,
    })?;
    tracing::debug!(label, "selinux exec label set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_profile_is_a_noop() {
        apply_apparmor_profile("").expect("empty profile");
    }

    #[test]
    fn empty_label_is_a_noop() {
        set_process_label("").expect("empty label");
    }
}
