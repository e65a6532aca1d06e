use std::path::PathBuf;

use nix::mount::MsFlags;

pub(crate) const KMSG_PATH: &str = "/dev/kmsg";
pub(crate) const IMAGE_DIR: &str = "/";
pub(crate) const STAGING_DIR: &str = "/newroot";
pub(crate) const LOOP_CONTROL: &str = "/dev/loop-control";
pub(crate) const LOOP_PREFIX: &str = "/dev/loop";

/// Pseudo filesystems moved under the staging root before the switch.
pub(crate) const RELOCATED_MOUNTS: [&str; 5] = ["/dev", "/proc", "/sys", "/tmp", "/run"];

/// A kernel mount request: `mount(source, target, fstype, flags, data)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MountSpec {
    pub source: String,
    pub target: PathBuf,
    pub fstype: String,
    pub flags: MsFlags,
    pub data: Option<String>,
}

impl MountSpec {
    fn new(fstype: &str, target: &str, flags: MsFlags, data: Option<&str>) -> Self {
        Self {
            source: fstype.to_string(),
            target: PathBuf::from(target),
            fstype: fstype.to_string(),
            flags,
            data: data.map(String::from),
        }
    }
}

/// An executable the boot hands control to.
#[derive(Debug, Clone, PartialEq)]
pub struct InitCandidate {
    pub path: PathBuf,
    /// Full argument vector, `argv[0]` included.
    pub argv: Vec<String>,
    /// Only try this candidate when the named file exists.
    pub requires: Option<PathBuf>,
}

impl InitCandidate {
    pub fn new(path: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            argv: vec![path.to_string()],
            requires: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BootConfig {
    pub kmsg: PathBuf,
    pub image_dir: PathBuf,
    pub staging: PathBuf,
    pub loop_control: PathBuf,
    pub loop_prefix: String,
    /// Mounted in order; the first entry must provide the device tree.
    pub pseudo_mounts: Vec<MountSpec>,
    pub relocations: Vec<PathBuf>,
    pub init_candidates: Vec<InitCandidate>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            kmsg: PathBuf::from(KMSG_PATH),
            image_dir: PathBuf::from(IMAGE_DIR),
            staging: PathBuf::from(STAGING_DIR),
            loop_control: PathBuf::from(LOOP_CONTROL),
            loop_prefix: LOOP_PREFIX.to_string(),
            pseudo_mounts: default_pseudo_mounts(),
            relocations: RELOCATED_MOUNTS.iter().map(PathBuf::from).collect(),
            init_candidates: default_init_candidates(),
        }
    }
}

fn default_pseudo_mounts() -> Vec<MountSpec> {
    let nosuid = MsFlags::MS_NOSUID;
    let nodev = MsFlags::MS_NOSUID | MsFlags::MS_NODEV;
    let kernel = MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC;

    vec![
        MountSpec::new("devtmpfs", "/dev", nosuid, None),
        MountSpec::new(
            "devpts",
            "/dev/pts",
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            Some("gid=5,mode=620,ptmxmode=666"),
        ),
        MountSpec::new("tmpfs", "/dev/shm", nodev, Some("mode=1777")),
        MountSpec::new("tmpfs", "/tmp", nodev, Some("mode=1777")),
        MountSpec::new("tmpfs", "/run", nodev, Some("mode=755")),
        MountSpec::new("proc", "/proc", kernel, None),
        MountSpec::new("sysfs", "/sys", kernel, None),
        MountSpec::new("cgroup2", "/sys/fs/cgroup", kernel, None),
        MountSpec::new("configfs", "/sys/kernel/config", kernel, None),
    ]
}

fn default_init_candidates() -> Vec<InitCandidate> {
    vec![
        InitCandidate {
            path: PathBuf::from("/sbin/getty"),
            argv: ["getty", "-n", "-l", "/etc/bootstrap.sh", "0", "console"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            requires: Some(PathBuf::from("/etc/bootstrap.sh")),
        },
        InitCandidate::new("/sbin/init"),
        InitCandidate::new("/init"),
    ]
}
