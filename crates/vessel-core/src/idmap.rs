//! UID/GID map writing for user namespaces.
//!
//! The parent writes `/proc/<pid>/uid_map` and `gid_map` after the clone
//! while the child is still parked on the sync pipe. Writing from the parent
//! (rather than via clone attributes) also works when the write requires
//! `CAP_SETUID`/`CAP_SETGID` the child itself does not hold.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use vessel_common::config::{ContainerConfig, IdMap};
use vessel_common::constants::MAX_ID_MAPPINGS;
use vessel_common::error::{Result, VesselError};

/// Writes UID/GID mapping tables into an arbitrary proc root.
///
/// The default root is `/proc`; tests point it at a scratch directory.
#[derive(Debug, Clone)]
pub struct IdMapWriter {
    proc_root: PathBuf,
}

impl Default for IdMapWriter {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl IdMapWriter {
    /// Creates a writer rooted at a non-standard proc directory.
    #[must_use]
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Writes the UID map, then the GID map, for `pid`.
    ///
    /// Tables are validated against the kernel limit before any file is
    /// touched; each map file is written with a single `write(2)`, as the
    /// kernel only accepts one write per file.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::MappingLimit`] when either table has more than
    /// five entries, or [`VesselError::MapWrite`] on I/O failure.
    pub fn write_maps(&self, pid: i32, uids: &[IdMap], gids: &[IdMap]) -> Result<()> {
        for table in [uids, gids] {
            if table.len() > MAX_ID_MAPPINGS {
                return Err(VesselError::MappingLimit { count: table.len() });
            }
        }
        for (file, table) in [("uid_map", uids), ("gid_map", gids)] {
            if table.is_empty() {
                continue;
            }
            let path = self.proc_root.join(pid.to_string()).join(file);
            self.write_table(&path, table)?;
            tracing::debug!(pid, file, entries = table.len(), "id map written");
        }
        Ok(())
    }

    fn write_table(&self, path: &PathBuf, table: &[IdMap]) -> Result<()> {
        let map_write = |err: std::io::Error| VesselError::MapWrite {
            file: path.clone(),
            errno: err.raw_os_error().unwrap_or(0),
        };
        // No O_TRUNC: the kernel accepts exactly one write to a map file.
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(path)
            .map_err(map_write)?;
        file.write_all(format_table(table).as_bytes())
            .map_err(map_write)
    }
}

/// Formats a mapping table in the kernel's `"container host size\n"` layout.
#[must_use]
pub fn format_table(table: &[IdMap]) -> String {
    let mut out = String::new();
    for map in table {
        out.push_str(&format!("{} {} {}\n", map.container_id, map.host_id, map.size));
    }
    out
}

/// Resolves container UID 0 through the configured UID mappings.
///
/// Returns 0 when no user namespace is requested; the child then runs as
/// host root directly.
///
/// # Errors
///
/// Returns an error when a user namespace is requested but no mapping
/// entry covers container UID 0.
pub fn host_root_uid(config: &ContainerConfig) -> Result<u32> {
    if !config.wants_user_namespace() {
        return Ok(0);
    }
    for map in &config.uid_mappings {
        if map.container_id == 0 && map.size > 0 {
            return Ok(map.host_id);
        }
    }
    Err(VesselError::Config {
        message: "no uid mapping covers container uid 0".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn map(container_id: u32, host_id: u32, size: u32) -> IdMap {
        IdMap {
            container_id,
            host_id,
            size,
        }
    }

    #[test]
    fn format_matches_kernel_layout() {
        let table = vec![map(0, 1000, 1), map(1, 100_000, 65_536)];
        assert_eq!(format_table(&table), "0 1000 1\n1 100000 65536\n");
    }

    #[test]
    fn write_maps_writes_expected_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("42")).expect("proc pid dir");

        let writer = IdMapWriter::with_proc_root(dir.path());
        writer
            .write_maps(42, &[map(0, 1000, 1)], &[map(0, 1000, 1)])
            .expect("write maps");

        let uid_map = std::fs::read_to_string(dir.path().join("42/uid_map")).expect("uid_map");
        assert_eq!(uid_map, "0 1000 1\n");
        let gid_map = std::fs::read_to_string(dir.path().join("42/gid_map")).expect("gid_map");
        assert_eq!(gid_map, "0 1000 1\n");
    }

    #[test]
    fn six_entries_hit_the_mapping_limit() {
        let table: Vec<IdMap> = (0..6).map(|i| map(i, 1000 + i, 1)).collect();
        let writer = IdMapWriter::default();
        let err = writer.write_maps(1, &table, &[]).unwrap_err();
        assert!(matches!(err, VesselError::MappingLimit { count: 6 }));
    }

    #[test]
    fn empty_tables_write_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("7")).expect("proc pid dir");

        let writer = IdMapWriter::with_proc_root(dir.path());
        writer.write_maps(7, &[], &[]).expect("write maps");
        assert!(!dir.path().join("7/uid_map").exists());
    }

    #[test]
    fn map_write_error_carries_file_and_errno() {
        let writer = IdMapWriter::with_proc_root("/nonexistent-proc-root");
        let err = writer.write_maps(1, &[map(0, 0, 1)], &[]).unwrap_err();
        match err {
            VesselError::MapWrite { file, errno } => {
                assert!(file.ends_with("1/uid_map"));
                assert_ne!(errno, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn host_root_uid_without_user_namespace_is_zero() {
        let config = ContainerConfig::default();
        assert_eq!(host_root_uid(&config).expect("uid"), 0);
    }

    #[test]
    fn host_root_uid_resolves_through_mapping() {
        let mut namespaces = BTreeMap::new();
        namespaces.insert("NEWUSER".to_string(), true);
        let config = ContainerConfig {
            namespaces,
            uid_mappings: vec![map(0, 1000, 1)],
            ..ContainerConfig::default()
        };
        assert_eq!(host_root_uid(&config).expect("uid"), 1000);
    }

    #[test]
    fn host_root_uid_errors_when_zero_uncovered() {
        let mut namespaces = BTreeMap::new();
        namespaces.insert("NEWUSER".to_string(), true);
        let config = ContainerConfig {
            namespaces,
            uid_mappings: vec![map(1000, 1000, 1)],
            ..ContainerConfig::default()
        };
        assert!(host_root_uid(&config).is_err());
    }
}
