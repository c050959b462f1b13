//! Pid-file based daemon control for the start/stop/restart commands.

use std::fs;
use std::io;
use std::path::Path;

pub fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn is_running(pid: i32) -> bool {
    // Signal 0 probes for existence without touching the process.
    unsafe { libc::kill(pid, 0) == 0 }
}

pub fn write_pid_file(path: &Path) -> io::Result<()> {
    fs::write(path, std::process::id().to_string())
}

pub fn remove_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Sends SIGTERM to the recorded daemon process. Returns whether a live
/// process was found.
pub fn stop(path: &Path) -> bool {
    let Some(pid) = read_pid(path) else {
        return false;
    };
    if !is_running(pid) {
        remove_pid_file(path);
        return false;
    }
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    true
}
