//! CPU affinity and scheduling priority for controller processes.

use crate::error::SchedError;

/// Number of cores this process may schedule onto.
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Pin `pid` to a single core.
#[cfg(target_os = "linux")]
pub fn pin_to_core(pid: u32, core: usize) -> Result<(), SchedError> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    set.set(core).map_err(|e| SchedError::Os {
        op: "cpu_set",
        pid,
        source: e.into(),
    })?;
    sched_setaffinity(Pid::from_raw(pid as i32), &set).map_err(|e| SchedError::Os {
        op: "sched_setaffinity",
        pid,
        source: e.into(),
    })
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_core(_pid: u32, _core: usize) -> Result<(), SchedError> {
    Err(SchedError::Unsupported("CPU pinning"))
}

/// Lower the nice value of `pid` toward `nice`.
///
/// Unprivileged users may only go as low as RLIMIT_NICE permits, so this
/// walks up from `nice` toward 0 and keeps the first value the kernel
/// accepts.
pub fn elevate_priority(pid: u32, nice: i32) -> Result<i32, SchedError> {
    let mut last_err = None;
    for candidate in nice..=nice.max(0) {
        // SAFETY: setpriority takes plain integers and touches no memory.
        let rc = unsafe {
            libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, candidate)
        };
        if rc == 0 {
            return Ok(candidate);
        }
        let err = std::io::Error::last_os_error();
        let missing = err.raw_os_error() == Some(libc::ESRCH);
        last_err = Some(err);
        if missing {
            break;
        }
    }
    Err(SchedError::Os {
        op: "setpriority",
        pid,
        source: last_err.unwrap_or_else(|| std::io::Error::from_raw_os_error(libc::EINVAL)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Far above any default pid_max
    const NO_SUCH_PID: u32 = 0x3fff_fff0;

    #[test]
    fn at_least_one_core() {
        assert!(available_cores() >= 1);
    }

    #[test]
    fn elevate_missing_process_fails() {
        let err = elevate_priority(NO_SUCH_PID, -5).unwrap_err();
        assert!(matches!(err, SchedError::Os { op: "setpriority", .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pin_missing_process_fails() {
        assert!(pin_to_core(NO_SUCH_PID, 0).is_err());
    }
}
