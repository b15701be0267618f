//! Linux capability management for least-privilege execution.
//!
//! Drops every capability the container configuration does not keep from
//! the bounding, ambient, effective, permitted, and inheritable sets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vessel_common::error::{Result, VesselError};

const STAGE: &str = "capabilities";

/// `_LINUX_CAPABILITY_VERSION_3`: two 32-bit words per set.
const CAPABILITY_VERSION_3: u32 = 0x2008_0522;

/// Linux capability identifiers, numbered as in `<linux/capability.h>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Capability {
    Chown = 0,
    DacOverride = 1,
    DacReadSearch = 2,
    Fowner = 3,
    Fsetid = 4,
    Kill = 5,
    Setgid = 6,
    Setuid = 7,
    Setpcap = 8,
    LinuxImmutable = 9,
    NetBindService = 10,
    NetBroadcast = 11,
    NetAdmin = 12,
    NetRaw = 13,
    IpcLock = 14,
    IpcOwner = 15,
    SysModule = 16,
    SysRawio = 17,
    SysChroot = 18,
    SysPtrace = 19,
    SysPacct = 20,
    SysAdmin = 21,
    SysBoot = 22,
    SysNice = 23,
    SysResource = 24,
    SysTime = 25,
    SysTtyConfig = 26,
    Mknod = 27,
    Lease = 28,
    AuditWrite = 29,
    AuditControl = 30,
    Setfcap = 31,
    MacOverride = 32,
    MacAdmin = 33,
    Syslog = 34,
    WakeAlarm = 35,
    BlockSuspend = 36,
    AuditRead = 37,
    Perfmon = 38,
    Bpf = 39,
    CheckpointRestore = 40,
}

/// Capabilities kept by unprivileged containers.
pub const DEFAULT_SAFE: [Capability; 14] = [
    Capability::Chown,
    Capability::DacOverride,
    Capability::Fowner,
    Capability::Fsetid,
    Capability::Kill,
    Capability::Setgid,
    Capability::Setuid,
    Capability::Setpcap,
    Capability::NetBindService,
    Capability::NetRaw,
    Capability::SysChroot,
    Capability::Mknod,
    Capability::AuditWrite,
    Capability::Setfcap,
];

impl Capability {
    /// Every capability known to this build, in kernel order.
    pub const ALL: [Self; 41] = [
        Self::Chown,
        Self::DacOverride,
        Self::DacReadSearch,
        Self::Fowner,
        Self::Fsetid,
        Self::Kill,
        Self::Setgid,
        Self::Setuid,
        Self::Setpcap,
        Self::LinuxImmutable,
        Self::NetBindService,
        Self::NetBroadcast,
        Self::NetAdmin,
        Self::NetRaw,
        Self::IpcLock,
        Self::IpcOwner,
        Self::SysModule,
        Self::SysRawio,
        Self::SysChroot,
        Self::SysPtrace,
        Self::SysPacct,
        Self::SysAdmin,
        Self::SysBoot,
        Self::SysNice,
        Self::SysResource,
        Self::SysTime,
        Self::SysTtyConfig,
        Self::Mknod,
        Self::Lease,
        Self::AuditWrite,
        Self::AuditControl,
        Self::Setfcap,
        Self::MacOverride,
        Self::MacAdmin,
        Self::Syslog,
        Self::WakeAlarm,
        Self::BlockSuspend,
        Self::AuditRead,
        Self::Perfmon,
        Self::Bpf,
        Self::CheckpointRestore,
    ];

    /// Kernel capability number.
    #[must_use]
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Lower-case name without the `CAP_` prefix.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Chown => "chown",
            Self::DacOverride => "dac_override",
            Self::DacReadSearch => "dac_read_search",
            Self::Fowner => "fowner",
            Self::Fsetid => "fsetid",
            Self::Kill => "kill",
            Self::Setgid => "setgid",
            Self::Setuid => "setuid",
            Self::Setpcap => "setpcap",
            Self::LinuxImmutable => "linux_immutable",
            Self::NetBindService => "net_bind_service",
            Self::NetBroadcast => "net_broadcast",
            Self::NetAdmin => "net_admin",
            Self::NetRaw => "net_raw",
            Self::IpcLock => "ipc_lock",
            Self::IpcOwner => "ipc_owner",
            Self::SysModule => "sys_module",
            Self::SysRawio => "sys_rawio",
            Self::SysChroot => "sys_chroot",
            Self::SysPtrace => "sys_ptrace",
            Self::SysPacct => "sys_pacct",
            Self::SysAdmin => "sys_admin",
            Self::SysBoot => "sys_boot",
            Self::SysNice => "sys_nice",
            Self::SysResource => "sys_resource",
            Self::SysTime => "sys_time",
            Self::SysTtyConfig => "sys_tty_config",
            Self::Mknod => "mknod",
            Self::Lease => "lease",
            Self::AuditWrite => "audit_write",
            Self::AuditControl => "audit_control",
            Self::Setfcap => "setfcap",
            Self::MacOverride => "mac_override",
            Self::MacAdmin => "mac_admin",
            Self::Syslog => "syslog",
            Self::WakeAlarm => "wake_alarm",
            Self::BlockSuspend => "block_suspend",
            Self::AuditRead => "audit_read",
            Self::Perfmon => "perfmon",
            Self::Bpf => "bpf",
            Self::CheckpointRestore => "checkpoint_restore",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CAP_{}", self.name().to_ascii_uppercase())
    }
}

impl FromStr for Capability {
    type Err = VesselError;

    /// Accepts `net_raw`, `NET_RAW`, and `CAP_NET_RAW`.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        let name = lower.strip_prefix("cap_").unwrap_or(&lower);
        Self::ALL
            .into_iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| VesselError::Config {
                message: format!("unknown capability: {s}"),
            })
    }
}

/// Capability policy as written in a container configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CapabilitySet {
    /// Keep everything the process already has.
    AllowAll,
    /// Keep [`DEFAULT_SAFE`].
    #[default]
    DefaultSafe,
    /// Start from [`DEFAULT_SAFE`], add `add`, then remove `drop`.
    Explicit {
        /// Capabilities kept in addition to the defaults.
        #[serde(default)]
        add: Vec<Capability>,
        /// Capabilities removed, taking precedence over `add`.
        #[serde(default)]
        drop: Vec<Capability>,
    },
}

impl CapabilitySet {
    /// Resolves the policy into the configuration applied in the child.
    #[must_use]
    pub fn resolve(&self) -> CapabilityConfig {
        match self {
            Self::AllowAll => CapabilityConfig::allow_all(),
            Self::DefaultSafe => CapabilityConfig::keep(DEFAULT_SAFE.to_vec()),
            Self::Explicit { add, drop } => {
                let mut keep: Vec<Capability> = DEFAULT_SAFE
                    .iter()
                    .chain(add.iter())
                    .copied()
                    .filter(|c| !drop.contains(c))
                    .collect();
                keep.sort_unstable();
                keep.dedup();
                CapabilityConfig::keep(keep)
            }
        }
    }
}

/// Capabilities retained by the container process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Skip capability dropping entirely.
    pub allow_all: bool,
    /// Capabilities that survive when `allow_all` is false.
    pub keep: Vec<Capability>,
}

impl CapabilityConfig {
    /// A configuration that leaves capabilities untouched.
    #[must_use]
    pub const fn allow_all() -> Self {
        Self {
            allow_all: true,
            keep: Vec::new(),
        }
    }

    /// A configuration that keeps exactly `keep`.
    #[must_use]
    pub const fn keep(keep: Vec<Capability>) -> Self {
        Self {
            allow_all: false,
            keep,
        }
    }

    /// Bitmask of the kept capabilities.
    #[must_use]
    pub fn mask(&self) -> u64 {
        self.keep
            .iter()
            .fold(0, |acc, c| acc | (1_u64 << c.number()))
    }

    /// Drops every capability not in `keep` from the calling process.
    ///
    /// The bounding set is reduced first so the kept mask also holds across
    /// `execve(2)`, then the ambient set is cleared and the effective,
    /// permitted, and inheritable sets are narrowed to `keep`. Nothing is
    /// ever raised.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::Security`] if any capability syscall fails.
    pub fn apply(&self) -> Result<()> {
        if self.allow_all {
            tracing::debug!("capabilities left untouched");
            return Ok(());
        }
        let mask = self.mask();
        let last = last_cap();
        tracing::info!(retained = self.keep.len(), last_cap = last, "dropping capabilities");

        for cap in 0..=last {
            if mask & (1_u64 << cap) == 0 {
                drop_bounding(cap)?;
            }
        }
        clear_ambient()?;

        let mut data = capget()?;
        let low = (mask & 0xFFFF_FFFF) as u32;
        let high = (mask >> 32) as u32;
        for (word, bits) in data.iter_mut().zip([low, high]) {
            word.permitted &= bits;
            word.effective &= bits;
            word.inheritable &= bits;
        }
        capset(&data)
    }
}

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

fn last_cap() -> u8 {
    std::fs::read_to_string("/proc/sys/kernel/cap_last_cap")
        .ok()
        .and_then(|s| s.trim().parse::<u8>().ok())
        .filter(|n| *n < 64)
        .unwrap_or(Capability::CheckpointRestore.number())
}

fn drop_bounding(cap: u8) -> Result<()> {
    // SAFETY: PR_CAPBSET_DROP takes a capability number and reads no memory.
    let rc = unsafe { libc::prctl(libc::PR_CAPBSET_DROP, libc::c_ulong::from(cap), 0, 0, 0) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EINVAL) {
        // Capability unknown to the running kernel.
        return Ok(());
    }
    Err(VesselError::security(
        STAGE,
        format!("dropping capability {cap} from the bounding set: {err}"),
    ))
}

fn clear_ambient() -> Result<()> {
    // SAFETY: PR_CAP_AMBIENT_CLEAR_ALL takes only integer arguments.
    let rc = unsafe {
        libc::prctl(
            libc::PR_CAP_AMBIENT,
            libc::PR_CAP_AMBIENT_CLEAR_ALL as libc::c_ulong,
            0,
            0,
            0,
        )
    };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EINVAL) {
        // Kernels before 4.3 have no ambient set.
        return Ok(());
    }
    Err(VesselError::security(STAGE, format!("clearing ambient capabilities: {err}")))
}

fn capget() -> Result<[CapUserData; 2]> {
    let mut header = CapUserHeader {
        version: CAPABILITY_VERSION_3,
        pid: 0,
    };
    let mut data = [CapUserData::default(); 2];
    // SAFETY: header and data are valid for the v3 layout the kernel expects.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_capget,
            &raw mut header,
            data.as_mut_ptr(),
        )
    };
    if rc != 0 {
        return Err(VesselError::security(
            STAGE,
            format!("capget: {}", std::io::Error::last_os_error()),
        ));
    }
    Ok(data)
}

fn capset(data: &[CapUserData; 2]) -> Result<()> {
    let mut header = CapUserHeader {
        version: CAPABILITY_VERSION_3,
        pid: 0,
    };
    // SAFETY: header and data are valid for the v3 layout the kernel expects.
    let rc = unsafe { libc::syscall(libc::SYS_capset, &raw mut header, data.as_ptr()) };
    if rc != 0 {
        return Err(VesselError::security(
            STAGE,
            format!("capset: {}", std::io::Error::last_os_error()),
        ));
    }
    tracing::debug!(
        permitted_low = data[0].permitted,
        permitted_high = data[1].permitted,
        "capability sets narrowed"
    );
    Ok(())
}
