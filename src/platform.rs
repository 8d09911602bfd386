//! Host platform detection: bottle tags, architecture and OS version.
//!
//! Bottles are published per platform under tags such as `arm64_sequoia`,
//! `x86_64_sonoma` or `x86_64_linux`. A bottle tagged `all` fits any host.

use anyhow::Result;
use std::process::Command;

/// Tag shared by bottles that run on every platform.
pub const UNIVERSAL_TAG: &str = "all";

/// Architecture spelled the way bottle tags spell it.
pub fn arch() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        other => other,
    }
}

/// Tag of the bottle this host should pour.
pub fn bottle_tag() -> Result<String> {
    #[cfg(target_os = "macos")]
    {
        let version = os_version().unwrap_or_default();
        Ok(format!("{}_{}", arch(), macos_name(&version)))
    }

    #[cfg(target_os = "linux")]
    {
        Ok(format!("{}_linux", arch()))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        anyhow::bail!("Unsupported platform: {}", std::env::consts::OS)
    }
}

/// Operating system release, e.g. `14.5` on macOS or the kernel release on Linux.
pub fn os_version() -> Option<String> {
    let output = if cfg!(target_os = "macos") {
        Command::new("sw_vers").arg("-productVersion").output()
    } else {
        Command::new("uname").arg("-r").output()
    }
    .ok()?;

    if !output.status.success() {
        return None;
    }

    let version = String::from_utf8(output.stdout).ok()?;
    let version = version.trim();
    // Kernel releases carry suffixes like `6.8.0-45-generic`.
    let numeric: String = version
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if numeric.is_empty() {
        None
    } else {
        Some(numeric)
    }
}

pub fn macos_name(version: &str) -> &'static str {
    let major: u32 = version
        .split('.')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    match major {
        26 | 16 => "tahoe",
        15 => "sequoia",
        14 => "sonoma",
        13 => "ventura",
        12 => "monterey",
        11 => "big_sur",
        _ => "sonoma",
    }
}
