//! System-wide constants and default paths.

/// Default base directory for Vessel container data.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/vessel";

/// File name of the persisted runtime state inside a container's data directory.
pub const STATE_FILE: &str = "state.json";

/// Mount root of the cgroup filesystem hierarchies.
pub const CGROUP_FS_ROOT: &str = "/sys/fs/cgroup";

/// Directory whose presence indicates a running systemd instance.
pub const SYSTEMD_RUN_DIR: &str = "/run/systemd/system";

/// Environment variable carrying the console path into the child.
pub const ENV_CONSOLE: &str = "console";

/// Environment variable carrying the sync-pipe FD number into the child.
pub const ENV_PIPE: &str = "pipe";

/// Environment variable carrying the data directory into the child.
pub const ENV_DATA_PATH: &str = "data_path";

/// File descriptor number at which the child inherits the sync pipe.
pub const CHILD_PIPE_FD: i32 = 3;

/// Kernel limit on UID/GID mapping table entries.
pub const MAX_ID_MAPPINGS: usize = 5;

/// argv[0] prefix that marks a re-exec'd nsenter helper process.
pub const NSENTER_ARGV0_PREFIX: &str = "nsenter-";

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "vessel";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "vsl";
