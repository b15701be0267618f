//! Process creation inside fresh namespaces via `clone(2)`.
//!
//! A new PID namespace only applies to processes created *into* it, so the
//! isolation flags must be given to the same clone that produces the
//! container's first process. Everything the child needs is prepared before
//! cloning; the child side only performs raw syscalls and `execve(2)`.
//!
//! Two pipes connect parent and child:
//! - the **sync pipe** holds the child until the parent has written the
//!   UID/GID maps of a new user namespace;
//! - the **status pipe** is close-on-exec, so EOF tells the parent the
//!   payload started. Failures before that point are written into it.

use std::ffi::{CString, c_char};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sched::clone;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Pid, pipe2};
use vessel_common::error::{Result, VesselError};

use super::{NamespaceKind, NamespaceSet};

/// Descriptor number at which a child receives the status pipe when
/// [`SpawnRequest::pass_status_fd`] is set.
pub const STATUS_FD: RawFd = 3;

const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Exit status of a cloned child whose `execve(2)` failed.
const EXEC_FAILED: isize = 127;

/// Description of a process to create in new namespaces.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Program to execute.
    pub program: PathBuf,
    /// Full argument vector, including `argv[0]`.
    pub args: Vec<String>,
    /// Explicit environment; `None` inherits the parent's.
    pub env: Option<Vec<(String, String)>>,
    /// Directory to change into before exec.
    pub working_dir: Option<PathBuf>,
    /// Namespaces the child is created in.
    pub namespaces: NamespaceSet,
    /// Resolve `program` through `PATH`.
    pub search_path: bool,
    /// Keep the status pipe open across exec at [`STATUS_FD`].
    pub pass_status_fd: bool,
}

impl SpawnRequest {
    /// Creates a request running `program` with `args` in no new namespaces.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: None,
            working_dir: None,
            namespaces: NamespaceSet::empty(),
            search_path: false,
            pass_status_fd: false,
        }
    }

    /// Sets the namespaces for the child.
    #[must_use]
    pub const fn namespaces(mut self, namespaces: NamespaceSet) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Replaces the inherited environment with `env`.
    #[must_use]
    pub fn env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = Some(env);
        self
    }

    /// Sets the child's working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// Resolves the program through `PATH`.
    #[must_use]
    pub const fn search_path(mut self, search: bool) -> Self {
        self.search_path = search;
        self
    }

    /// Hands the status pipe to the executed program.
    #[must_use]
    pub const fn pass_status_fd(mut self, pass: bool) -> Self {
        self.pass_status_fd = pass;
        self
    }
}

/// C representations built before cloning, so the child never allocates.
struct Prepared {
    program: CString,
    working_dir: Option<CString>,
    // Backing storage for the pointers in `argv` and `envp`.
    _args: Vec<CString>,
    _env: Option<Vec<CString>>,
    argv: Vec<*const c_char>,
    envp: Option<Vec<*const c_char>>,
}

impl Prepared {
    fn from_request(req: &SpawnRequest) -> Result<Self> {
        if req.args.is_empty() {
            return Err(VesselError::Config {
                message: "argument vector must not be empty".into(),
            });
        }
        let env = req
            .env
            .as_ref()
            .map(|vars| {
                vars.iter()
                    .map(|(k, v)| to_cstring(&format!("{k}={v}")))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;
        let args: Vec<CString> = req
            .args
            .iter()
            .map(|a| to_cstring(a))
            .collect::<Result<_>>()?;
        let argv = null_terminated(&args);
        let envp = env.as_deref().map(null_terminated);
        Ok(Self {
            program: path_to_cstring(&req.program)?,
            working_dir: req.working_dir.as_deref().map(path_to_cstring).transpose()?,
            _args: args,
            _env: env,
            argv,
            envp,
        })
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn to_cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| VesselError::Config {
        message: format!("value contains an interior NUL byte: {s:?}"),
    })
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| VesselError::Config {
        message: format!("path contains an interior NUL byte: {}", path.display()),
    })
}

/// A process created by [`spawn_isolated`].
#[derive(Debug)]
pub struct IsolatedChild {
    pid: Pid,
    status: Option<File>,
}

impl IsolatedChild {
    /// Returns the child's PID as seen from the parent's namespace.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Blocks until the child has exec'd its payload or reported a failure.
    ///
    /// Returns the failure message written by the child, if any. Calling this
    /// more than once returns `Ok(())` after the first call.
    ///
    /// # Errors
    ///
    /// Returns the child's failure message, or a description of the read error.
    pub fn await_start(&mut self) -> std::result::Result<(), String> {
        let Some(mut pipe) = self.status.take() else {
            return Ok(());
        };
        let mut report = String::new();
        match pipe.read_to_string(&mut report) {
            Ok(_) if report.trim().is_empty() => Ok(()),
            Ok(_) => Err(report.trim().to_string()),
            Err(e) => Err(format!("reading status pipe: {e}")),
        }
    }

    /// Waits for the child to terminate and returns its exit status.
    ///
    /// Signal deaths are reported as `128 + signal`.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid(2)` fails for a reason other than `EINTR`.
    pub fn wait(&self) -> Result<i32> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => {
                    return Err(VesselError::Io {
                        path: format!("waitpid({})", self.pid).into(),
                        source: std::io::Error::from(e),
                    });
                }
            }
        }
    }
}

/// Clones a child into the requested namespaces and executes the program.
///
/// # Errors
///
/// Returns an error if the request cannot be encoded, if pipes cannot be
/// created, if `clone(2)` fails, or if the user namespace maps cannot be
/// written.
pub fn spawn_isolated(req: &SpawnRequest) -> Result<IsolatedChild> {
    let prepared = Prepared::from_request(req)?;
    let (sync_read, sync_write) = pipe2(OFlag::O_CLOEXEC).map_err(pipe_error)?;
    let (status_read, status_write) = pipe2(OFlag::O_CLOEXEC).map_err(pipe_error)?;

    let fds = ChildFds {
        sync_read: sync_read.as_raw_fd(),
        sync_write: sync_write.as_raw_fd(),
        status_read: status_read.as_raw_fd(),
        status_write: status_write.as_raw_fd(),
    };
    let search_path = req.search_path;
    let pass_status_fd = req.pass_status_fd;

    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let callback = Box::new(|| child_main(&prepared, fds, search_path, pass_status_fd));
    let flags = req.namespaces.clone_flags();

    tracing::debug!(
        program = %req.program.display(),
        namespaces = %req.namespaces,
        "cloning isolated child"
    );
    // SAFETY: the child runs `child_main`, which only performs raw syscalls on
    // data prepared before the clone and then replaces itself with `execve`.
    let pid = unsafe { clone(callback, &mut stack, flags, Some(Signal::SIGCHLD as i32)) }
        .map_err(|e| VesselError::Namespace {
            message: format!("clone({}) failed: {e}", req.namespaces),
        })?;

    drop(sync_read);
    drop(status_write);

    let child = IsolatedChild {
        pid,
        status: Some(File::from(status_read)),
    };

    if req.namespaces.contains(NamespaceKind::User) {
        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        if let Err(e) = super::user::write_id_maps(pid, uid, gid) {
            drop(sync_write);
            let _ = child.wait();
            return Err(e);
        }
    }

    release(&child, File::from(sync_write))?;
    tracing::debug!(pid = pid.as_raw(), "isolated child released");
    Ok(child)
}

/// Lets the child past its sync read. A child that died before it could be
/// released is reaped before the error is returned.
fn release(child: &IsolatedChild, mut sync: impl Write) -> Result<()> {
    if let Err(e) = sync.write_all(&[1]) {
        let _ = child.wait();
        return Err(VesselError::Io {
            path: "sync pipe".into(),
            source: e,
        });
    }
    Ok(())
}

fn pipe_error(e: Errno) -> VesselError {
    VesselError::Io {
        path: "pipe2".into(),
        source: std::io::Error::from(e),
    }
}

#[derive(Clone, Copy)]
struct ChildFds {
    sync_read: RawFd,
    sync_write: RawFd,
    status_read: RawFd,
    status_write: RawFd,
}

/// Entry point of the cloned child. Returns only on failure.
fn child_main(prepared: &Prepared, fds: ChildFds, search_path: bool, pass_status_fd: bool) -> isize {
    // SAFETY: raw syscalls on descriptors inherited from the parent and on
    // NUL-terminated buffers owned by `prepared`, which outlives this call.
    unsafe {
        let _ = libc::close(fds.sync_write);
        let _ = libc::close(fds.status_read);

        let mut byte = 0u8;
        let n = libc::read(fds.sync_read, (&raw mut byte).cast(), 1);
        let _ = libc::close(fds.sync_read);
        if n != 1 {
            return 1;
        }

        if let Some(dir) = &prepared.working_dir {
            if libc::chdir(dir.as_ptr()) != 0 {
                report(fds.status_write, b"chdir to working directory failed: ", Errno::last());
                return EXEC_FAILED;
            }
        }

        if pass_status_fd {
            if fds.status_write == STATUS_FD {
                let _ = libc::fcntl(STATUS_FD, libc::F_SETFD, 0);
            } else if libc::dup2(fds.status_write, STATUS_FD) < 0 {
                report(fds.status_write, b"dup2 of status pipe failed: ", Errno::last());
                return EXEC_FAILED;
            }
        }

        let program = prepared.program.as_ptr();
        let argv = prepared.argv.as_ptr();
        let _ = match (&prepared.envp, search_path) {
            (Some(envp), true) => libc::execvpe(program, argv, envp.as_ptr()),
            (Some(envp), false) => libc::execve(program, argv, envp.as_ptr()),
            (None, true) => libc::execvp(program, argv),
            (None, false) => libc::execv(program, argv),
        };
    }
    report(fds.status_write, b"exec failed: ", Errno::last());
    EXEC_FAILED
}

/// Writes `prefix` and the errno description to the status pipe without allocating.
fn report(fd: RawFd, prefix: &[u8], errno: Errno) {
    let desc = errno.desc().as_bytes();
    // SAFETY: writing initialized byte slices to an open descriptor.
    unsafe {
        let _ = libc::write(fd, prefix.as_ptr().cast(), prefix.len());
        let _ = libc::write(fd, desc.as_ptr().cast(), desc.len());
    }
}
