// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());

    let memory_x = fs::read_to_string(manifest_dir.join("memory.x")).expect("read memory.x");
    fs::write(out_dir.join("memory.x"), memory_x).expect("write memory.x");

    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rustc-link-arg=-Tlink.x");
    println!("cargo:rustc-link-arg=-Tdefmt.x");
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");

    // Commit identity for the SoftwareBuild broadcast: 14 hex digits (7
    // bytes) plus a dirty-tree flag. Falls back to zeros outside a checkout.
    let commit = git(&["rev-parse", "--short=14", "HEAD"]).unwrap_or_default();
    let commit = if commit.len() == 14 && commit.bytes().all(|b| b.is_ascii_hexdigit()) {
        commit
    } else {
        "00000000000000".to_string()
    };
    let dirty = git(&["status", "--porcelain"]).map_or(false, |s| !s.is_empty());

    println!("cargo:rustc-env=GIT_COMMIT_HASH={commit}");
    println!("cargo:rustc-env=GIT_TREE_DIRTY={}", if dirty { "1" } else { "0" });
}

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8(out.stdout).ok()?.trim().to_string())
}
