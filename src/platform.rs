//! Platform-specific process helpers

/// Send a graceful termination request to `pid`
#[cfg(unix)]
pub fn terminate_process(pid: u32) {
    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if rc != 0 {
        log::warn!(
            "Failed to send SIGTERM to {pid}: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Send a graceful termination request to `pid`
#[cfg(not(unix))]
pub fn terminate_process(pid: u32) {
    let result = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    if let Err(e) = result {
        log::warn!("Failed to run taskkill for {pid}: {e}");
    }
}
