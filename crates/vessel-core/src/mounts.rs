//! Mount-namespace initialization.
//!
//! Turns a bare rootfs directory into the container's world: private mount
//! propagation, pseudo-filesystems, device nodes, console wiring, extra
//! bind mounts, then the `pivot_root(2)` switch. Runs inside the child's
//! fresh mount namespace, before the user command is exec'd.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use nix::unistd::{chown, Gid, Uid};
use vessel_common::config::MountConfig;
use vessel_common::error::{Result, VesselError};

const PUT_OLD: &str = ".pivot_old";

/// Device nodes every container receives: name, major, minor.
const DEVICE_NODES: [(&str, u64, u64); 6] = [
    ("null", 1, 3),
    ("zero", 1, 5),
    ("full", 1, 7),
    ("random", 1, 8),
    ("urandom", 1, 9),
    ("tty", 5, 0),
];

/// Initializes the mount namespace at `rootfs` and switches the root.
///
/// `console` is the pseudo-terminal slave to surface as `/dev/console`
/// (empty for none); `root_uid` owns the device files, resolved through
/// the UID mappings when a user namespace is in play.
///
/// # Errors
///
/// Returns an error if any mount, node creation, or the final pivot fails.
pub fn init_mount_namespace(
    rootfs: &Path,
    console: &str,
    root_uid: u32,
    config: &MountConfig,
) -> Result<()> {
    // Keep our mounts out of the host's namespace, and theirs out of ours.
    mount_raw(None, "/", None, MsFlags::MS_SLAVE | MsFlags::MS_REC, None)?;
    mount_raw(
        Some(rootfs),
        rootfs,
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
    )?;

    mount_pseudo_filesystems(rootfs, root_uid)?;
    create_device_nodes(rootfs, root_uid)?;

    if !console.is_empty() {
        setup_console(rootfs, console, root_uid)?;
    }
    for bind in &config.mounts {
        bind_mount(&bind.source, &rootfs.join(relative(&bind.destination)), bind.writable)?;
    }
    if config.readonly_fs {
        mount_raw(
            Some(rootfs),
            rootfs,
            None,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None,
        )?;
    }

    if config.no_pivot_root {
        enter_chroot(rootfs)?;
    } else {
        pivot_root(rootfs)?;
    }
    tracing::debug!(rootfs = %rootfs.display(), "mount namespace initialized");
    Ok(())
}

/// Creates a bind mount, read-only unless `writable`.
///
/// # Errors
///
/// Returns an error if the target cannot be prepared or mounted.
pub fn bind_mount(source: &Path, target: &Path, writable: bool) -> Result<()> {
    let io_err = |err: std::io::Error| VesselError::Io {
        path: target.to_path_buf(),
        source: err,
    };
    if source.is_dir() {
        std::fs::create_dir_all(target).map_err(io_err)?;
    } else {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        if !target.exists() {
            std::fs::File::create(target).map_err(io_err)?;
        }
    }
    mount_raw(Some(source), target, None, MsFlags::MS_BIND | MsFlags::MS_REC, None)?;
    if !writable {
        mount_raw(
            Some(source),
            target,
            None,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None,
        )?;
    }
    Ok(())
}

fn mount_pseudo_filesystems(rootfs: &Path, root_uid: u32) -> Result<()> {
    let defaults = MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV;
    let dev_data = format!("mode=755,uid={root_uid},gid={root_uid}");
    let table: [(&str, &str, MsFlags, Option<&str>); 5] = [
        ("proc", "proc", defaults, None),
        ("sysfs", "sys", defaults, None),
        ("tmpfs", "dev", MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME, Some(dev_data.as_str())),
        ("devpts", "dev/pts", MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID, Some("newinstance,ptmxmode=0666,mode=620")),
        ("tmpfs", "dev/shm", defaults, Some("mode=1777,size=65536k")),
    ];
    for (fstype, target, flags, data) in table {
        let target = rootfs.join(target);
        std::fs::create_dir_all(&target).map_err(|err| VesselError::Io {
            path: target.clone(),
            source: err,
        })?;
        mount_raw(Some(Path::new(fstype)), &target, Some(fstype), flags, data)?;
    }
    std::os::unix::fs::symlink("pts/ptmx", rootfs.join("dev/ptmx")).map_err(|err| {
        VesselError::Io {
            path: rootfs.join("dev/ptmx"),
            source: err,
        }
    })?;
    Ok(())
}

fn create_device_nodes(rootfs: &Path, root_uid: u32) -> Result<()> {
    for (name, major, minor) in DEVICE_NODES {
        let path = rootfs.join("dev").join(name);
        match mknod(
            &path,
            SFlag::S_IFCHR,
            Mode::from_bits_truncate(0o666),
            makedev(major, minor),
        ) {
            Ok(()) => chown_to_root(&path, root_uid)?,
            // A user namespace cannot mknod device files; bind the host's
            // node instead, as joined-namespace runtimes do.
            Err(nix::errno::Errno::EPERM) => {
                bind_mount(&Path::new("/dev").join(name), &path, true)?;
            }
            Err(errno) => {
                return Err(VesselError::Unexpected {
                    syscall: "mknod",
                    errno: errno as i32,
                })
            }
        }
    }
    Ok(())
}

fn setup_console(rootfs: &Path, console: &str, root_uid: u32) -> Result<()> {
    let target = rootfs.join("dev/console");
    let io_err = |path: PathBuf| {
        move |err: std::io::Error| VesselError::Io { path, source: err }
    };
    std::fs::File::create(&target).map_err(io_err(target.clone()))?;
    std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o600))
        .map_err(io_err(target.clone()))?;
    chown_to_root(Path::new(console), root_uid)?;
    mount_raw(Some(Path::new(console)), &target, None, MsFlags::MS_BIND, None)
}

fn chown_to_root(path: &Path, root_uid: u32) -> Result<()> {
    chown(path, Some(Uid::from_raw(root_uid)), Some(Gid::from_raw(root_uid))).map_err(|errno| {
        VesselError::Unexpected {
            syscall: "chown",
            errno: errno as i32,
        }
    })
}

/// The full pivot sequence, leaving no trace of the old root:
/// `pivot_root(2)` into `rootfs`, then lazily unmount and remove the
/// temporary old-root directory.
fn pivot_root(rootfs: &Path) -> Result<()> {
    let put_old = rootfs.join(PUT_OLD);
    std::fs::create_dir_all(&put_old).map_err(|err| VesselError::Io {
        path: put_old.clone(),
        source: err,
    })?;

    nix::unistd::pivot_root(rootfs, &put_old).map_err(|errno| VesselError::Unexpected {
        syscall: "pivot_root",
        errno: errno as i32,
    })?;
    chdir_root()?;

    let old_root = Path::new("/").join(PUT_OLD);
    umount2(&old_root, MntFlags::MNT_DETACH).map_err(|errno| VesselError::Unexpected {
        syscall: "umount2",
        errno: errno as i32,
    })?;
    let _ = std::fs::remove_dir(&old_root);
    Ok(())
}

fn enter_chroot(rootfs: &Path) -> Result<()> {
    nix::unistd::chroot(rootfs).map_err(|errno| VesselError::Unexpected {
        syscall: "chroot",
        errno: errno as i32,
    })?;
    chdir_root()
}

fn chdir_root() -> Result<()> {
    std::env::set_current_dir("/").map_err(|err| VesselError::Io {
        path: "/".into(),
        source: err,
    })
}

fn mount_raw(
    source: Option<&Path>,
    target: impl AsRef<Path>,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    mount(source, target.as_ref(), fstype, flags, data).map_err(|errno| {
        VesselError::Unexpected {
            syscall: "mount",
            errno: errno as i32,
        }
    })
}

fn relative(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}
