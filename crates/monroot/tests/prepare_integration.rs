//! End-to-end rootfs preparation.
//!
//! Each test runs the `monroot` binary with `--unshare`, so every mount lives
//! in a throwaway mount namespace. Root is required.

#![cfg(feature = "integration")]

use std::error::Error;
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn is_root() -> bool {
    rustix::process::geteuid().is_root()
}

fn write_bundle(bundle: &Path, config: &serde_json::Value) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(bundle.join("rootfs"))?;
    fs::write(bundle.join("config.json"), serde_json::to_string(config)?)?;
    Ok(())
}

/// Checks run by the monitor stand-in once inside the new root.
const CHECKS: &str = "\
test -c /dev/null && \
test -c /dev/urandom && \
test ! -e /dev/kvm && \
test ! -e /dev/net/tun && \
test -d /proc/self && \
test -k /tmp && \
test ! -e /old_root && \
test -r /data/marker && \
! touch /data/new 2>/dev/null && \
echo inside";

fn prepare(
    switch_args: &[&str],
    namespaces: serde_json::Value,
    stale_old_root: bool,
) -> Result<(), Box<dyn Error>> {
    if !is_root() {
        eprintln!("skipping: root required");
        return Ok(());
    }

    let temp = TempDir::new()?;
    let bundle = temp.path().join("bundle");
    let host_data = temp.path().join("host-data");
    fs::create_dir_all(&host_data)?;
    fs::write(host_data.join("marker"), b"x")?;

    write_bundle(
        &bundle,
        &serde_json::json!({
            "ociVersion": "1.2.0",
            "root": { "path": "rootfs" },
            "mounts": [
                { "destination": "/data", "type": "bind", "source": host_data,
                  "options": ["rbind", "ro", "noexec"] },
                { "destination": "/cache", "type": "volume", "source": "cache" }
            ],
            "linux": { "namespaces": namespaces }
        }),
    )?;
    if stale_old_root {
        fs::create_dir(bundle.join("rootfs/old_root"))?;
    }

    // The shell doubles as the monitor so it is present in the new root.
    Command::cargo_bin("monroot")?
        .args(["prepare", "--unshare", "--bundle"])
        .arg(&bundle)
        .args(["--monitor", "/bin/sh"])
        .args(switch_args)
        .args(["--", "/bin/sh", "-c", CHECKS])
        .assert()
        .success()
        .stdout(predicate::str::contains("inside"));

    let rootfs = bundle.join("rootfs");
    assert!(rootfs.join("bin/sh").exists());
    assert!(!rootfs.join("cache").exists());
    Ok(())
}

#[test]
fn test_prepare_with_pivot() -> Result<(), Box<dyn Error>> {
    prepare(&[], serde_json::json!([{ "type": "mount" }]), false)
}

#[test]
fn test_prepare_with_pivot_reuses_stale_old_root() -> Result<(), Box<dyn Error>> {
    prepare(&[], serde_json::json!([{ "type": "mount" }]), true)
}

#[test]
fn test_prepare_with_chroot() -> Result<(), Box<dyn Error>> {
    prepare(&["--no-pivot"], serde_json::json!([{ "type": "mount" }]), false)
}

#[test]
fn test_prepare_without_mount_namespace_chroots() -> Result<(), Box<dyn Error>> {
    prepare(&[], serde_json::json!([{ "type": "pid" }]), false)
}

#[test]
fn test_missing_block_device_fails_with_step() -> Result<(), Box<dyn Error>> {
    if !is_root() {
        eprintln!("skipping: root required");
        return Ok(());
    }

    let temp = TempDir::new()?;
    write_bundle(
        temp.path(),
        &serde_json::json!({ "ociVersion": "1.2.0", "root": { "path": "rootfs" } }),
    )?;

    Command::cargo_bin("monroot")?
        .args(["prepare", "--unshare", "--bundle"])
        .arg(temp.path())
        .args(["--monitor", "/bin/sh", "--block-device", "/dev/monroot-missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Rootfs step 'replicate /dev/monroot-missing' failed",
        ));
    Ok(())
}

#[test]
fn test_second_pivot_fails_cleanly() -> Result<(), Box<dyn Error>> {
    if !is_root() {
        eprintln!("skipping: root required");
        return Ok(());
    }

    let temp = TempDir::new()?;
    let bundle = temp.path().join("bundle");
    write_bundle(
        &bundle,
        &serde_json::json!({
            "ociVersion": "1.2.0",
            "root": { "path": "rootfs" },
            "mounts": [
                { "destination": "/bin/sh", "type": "bind", "source": "/bin/sh",
                  "options": ["bind", "ro"] }
            ],
            "linux": { "namespaces": [{ "type": "mount" }] }
        }),
    )?;

    // monroot is its own monitor, so it can pivot again from inside the
    // tree it just pivoted into.
    let monroot = env!("CARGO_BIN_EXE_monroot");
    let again = format!(
        "{monroot} switch --rootfs / ; test $? -ne 0 && test ! -e /old_root && echo clean"
    );

    Command::cargo_bin("monroot")?
        .args(["prepare", "--unshare", "--bundle"])
        .arg(&bundle)
        .args(["--monitor", monroot])
        .args(["--", "/bin/sh", "-c", &again])
        .assert()
        .success()
        .stdout(predicate::str::contains("clean"))
        .stderr(predicate::str::contains("pivot_root failed for /"));
    Ok(())
}
