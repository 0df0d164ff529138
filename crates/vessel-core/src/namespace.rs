//! Namespace selection and joining.
//!
//! The parent derives `clone(2)` flags from the configured namespace names;
//! helper processes attach to an existing container's namespaces with
//! `setns(2)` via `/proc/<pid>/ns/<name>`.

use std::collections::BTreeMap;
use std::fs::File;

use nix::sched::{setns, CloneFlags};
use vessel_common::error::{Result, VesselError};

/// Namespaces the in-namespace setup helper joins, in join order.
///
/// `mnt` comes last so `/proc/<pid>/ns` stays resolvable while the others
/// are opened; pid and user joining are reserved for the nsenter path.
pub const SETUP_JOIN_ORDER: [&str; 4] = ["ipc", "net", "uts", "mnt"];

/// Namespaces the nsenter helper joins, in join order.
///
/// `user` must come first so the later joins are permitted by the target's
/// user namespace; `pid` only takes effect for children, which is why the
/// helper forks once after joining.
pub const NSENTER_JOIN_ORDER: [&str; 6] = ["user", "ipc", "uts", "net", "pid", "mnt"];

/// Derives the clone-flag bitmask from a set of enabled namespace names.
///
/// Recognized names are the kernel spellings without the `CLONE_` prefix:
/// `NEWNS`, `NEWUTS`, `NEWIPC`, `NEWPID`, `NEWNET`, `NEWUSER`. Unknown
/// names and disabled entries contribute nothing.
#[must_use]
pub fn clone_flags(namespaces: &BTreeMap<String, bool>) -> CloneFlags {
    let mut flags = CloneFlags::empty();
    for (name, enabled) in namespaces {
        if !enabled {
            continue;
        }
        match name.as_str() {
            "NEWNS" => flags |= CloneFlags::CLONE_NEWNS,
            "NEWUTS" => flags |= CloneFlags::CLONE_NEWUTS,
            "NEWIPC" => flags |= CloneFlags::CLONE_NEWIPC,
            "NEWPID" => flags |= CloneFlags::CLONE_NEWPID,
            "NEWNET" => flags |= CloneFlags::CLONE_NEWNET,
            "NEWUSER" => flags |= CloneFlags::CLONE_NEWUSER,
            _ => {}
        }
    }
    flags
}

/// Attaches the calling thread to the named namespaces of `pid`.
///
/// Namespaces that do not exist for the target (e.g. `user` on a container
/// without a user namespace) are skipped. The caller must be single-threaded
/// for `pid` and `user` joins to behave as expected.
///
/// # Errors
///
/// Returns an error if a namespace file cannot be opened or `setns(2)` fails.
pub fn join(pid: i32, names: &[&str]) -> Result<()> {
    for name in names {
        let path = format!("/proc/{pid}/ns/{name}");
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(VesselError::Io {
                    path: path.into(),
                    source: err,
                })
            }
        };
        // Re-entering the namespace we already occupy is EINVAL, so a
        // container without e.g. a user namespace is simply passed through.
        if same_namespace(pid, name) {
            continue;
        }
        setns(&file, CloneFlags::empty()).map_err(|errno| VesselError::Unexpected {
            syscall: "setns",
            errno: errno as i32,
        })?;
        tracing::debug!(pid, name, "joined namespace");
    }
    Ok(())
}

fn same_namespace(pid: i32, name: &str) -> bool {
    let theirs = std::fs::read_link(format!("/proc/{pid}/ns/{name}"));
    let ours = std::fs::read_link(format!("/proc/self/ns/{name}"));
    matches!((theirs, ours), (Ok(theirs), Ok(ours)) if theirs == ours)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(entries: &[(&str, bool)]) -> BTreeMap<String, bool> {
        entries
            .iter()
            .map(|(name, enabled)| ((*name).to_string(), *enabled))
            .collect()
    }

    #[test]
    fn empty_set_yields_no_flags() {
        assert_eq!(clone_flags(&BTreeMap::new()), CloneFlags::empty());
    }

    #[test]
    fn all_known_names_map_to_their_flag() {
        let set = names(&[
            ("NEWNS", true),
            ("NEWUTS", true),
            ("NEWIPC", true),
            ("NEWPID", true),
            ("NEWNET", true),
            ("NEWUSER", true),
        ]);
        let expected = CloneFlags::CLONE_NEWNS
            | CloneFlags::CLONE_NEWUTS
            | CloneFlags::CLONE_NEWIPC
            | CloneFlags::CLONE_NEWPID
            | CloneFlags::CLONE_NEWNET
            | CloneFlags::CLONE_NEWUSER;
        assert_eq!(clone_flags(&set), expected);
    }

    #[test]
    fn unknown_names_do_not_affect_output() {
        let with_unknown = names(&[("NEWNS", true), ("NEWTIME", true), ("bogus", true)]);
        let without = names(&[("NEWNS", true)]);
        assert_eq!(clone_flags(&with_unknown), clone_flags(&without));
    }

    #[test]
    fn disabled_entries_contribute_nothing() {
        let set = names(&[("NEWNS", true), ("NEWNET", false)]);
        assert_eq!(clone_flags(&set), CloneFlags::CLONE_NEWNS);
    }

    #[test]
    fn same_input_same_output() {
        let set = names(&[("NEWUTS", true), ("NEWPID", true)]);
        assert_eq!(clone_flags(&set), clone_flags(&set));
    }
}
