#![forbid(unsafe_code)]

//! Privilege checks shared by the tubefetch binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when a binary is started as root. The server spawns yt-dlp and
/// ffmpeg against attacker-controlled URLs, so it is expected to run under an
/// unprivileged service account.
pub fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::current().is_root() {
        bail!("{process} must not be run as root; start it under an unprivileged account");
    }
    Ok(())
}
