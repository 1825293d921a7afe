// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    // Re-run build script if git HEAD changes
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");

    // Packagers may pin the version explicitly
    let version = match std::env::var("CAMERA_PIPELINE_VERSION") {
        Ok(v) => v,
        Err(_) => describe_version(),
    };

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// Version string in the form `<tag>-<hash>`, `<tag>-dirty-<hash>` or the
/// crate version when git metadata is unavailable.
fn describe_version() -> String {
    let described = Command::new("git")
        .args(["describe", "--tags", "--always", "--match", "v*"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string());

    let Some(described) = described else {
        return env!("CARGO_PKG_VERSION").to_string();
    };
    let described = described.strip_prefix('v').unwrap_or(&described);
    let hash = short_hash().unwrap_or_else(|| "unknown".to_string());

    let parts: Vec<&str> = described.rsplitn(3, '-').collect();
    if parts.len() == 3 {
        format!("{}-dirty-{}", parts[2], hash)
    } else {
        format!("{}-{}", described, hash)
    }
}

fn short_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
