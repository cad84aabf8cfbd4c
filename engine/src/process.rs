//! Process-group supervision for the container strategy.
//!
//! Every container invocation runs in its own session so the whole process
//! tree can be killed at once; nothing here is specific to a language or
//! image.

/// RAII guard that kills a child process (and its process group on Unix) on drop.
///
/// Wrap a spawned `tokio::process::Child` immediately after `spawn()` to ensure
/// cleanup if the owning future is cancelled or the wait loop returns early.
/// Call `disarm()` after the process exits normally to prevent the kill.
pub struct ChildGuard {
    child: Option<tokio::process::Child>,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: tokio::process::Child) -> Self {
        Self { child: Some(child) }
    }

    pub fn child_mut(&mut self) -> &mut tokio::process::Child {
        self.child.as_mut().expect("child present")
    }

    pub fn disarm(&mut self) {
        self.child = None;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                unsafe {
                    if libc::killpg(pid as i32, libc::SIGKILL) == -1 {
                        let _ = child.start_kill();
                    }
                }
            }
            let _ = child.try_wait();
        }
        #[cfg(windows)]
        {
            let _ = child.start_kill();
            let _ = child.try_wait();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    NotRunning,
    Killed,
}

/// Terminate a process (and its process group on Unix) best-effort.
///
/// On Unix this targets the process group id matching `pid`; [`set_new_session`]
/// makes pid equal to the process group id for every container child.
pub fn try_kill_process_group(pid: u32) -> std::io::Result<KillOutcome> {
    #[cfg(unix)]
    unsafe {
        if libc::killpg(pid as i32, libc::SIGKILL) == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(KillOutcome::NotRunning);
            }
            return Err(err);
        }
        Ok(KillOutcome::Killed)
    }

    #[cfg(windows)]
    {
        windows_try_kill_process(pid)
    }
}

/// Send `SIGTERM` to the process group (Unix only). The caller follows with
/// [`try_kill_process_group`] if the process is still alive after the grace
/// period.
#[cfg(unix)]
pub fn try_terminate_process_group(pid: u32) -> std::io::Result<KillOutcome> {
    unsafe {
        if libc::killpg(pid as i32, libc::SIGTERM) == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(KillOutcome::NotRunning);
            }
            return Err(err);
        }
        Ok(KillOutcome::Killed)
    }
}

#[cfg(windows)]
fn windows_try_kill_process(pid: u32) -> std::io::Result<KillOutcome> {
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
    use windows_sys::Win32::System::Threading::{
        OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE, TerminateProcess,
    };

    // SAFETY: Win32 API call.
    let handle = unsafe {
        OpenProcess(
            PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_TERMINATE,
            0,
            pid,
        )
    } as HANDLE;
    if handle.is_null() {
        return Ok(KillOutcome::NotRunning);
    }
    // SAFETY: handle is valid.
    let ok = unsafe { TerminateProcess(handle, 1) };
    let err = std::io::Error::last_os_error();
    unsafe {
        CloseHandle(handle);
    }
    if ok == 0 {
        return Err(err);
    }
    Ok(KillOutcome::Killed)
}

/// Put the child process in its own session (Unix only) so the entire process
/// group can be signaled via `killpg`.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut tokio::process::Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}
