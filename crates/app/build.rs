use std::env;
use std::process::Command;

/// Trimmed stdout of a command, or `None` if it could not run or failed.
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn set_env(key: &str, value: &str) {
    println!("cargo:rustc-env={}={}", key, value);
}

fn report_build_profile() {
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    set_env("BUILD_PROFILE", &profile);
}

fn report_enabled_features() {
    let mut enabled_features: Vec<&str> = Vec::new();

    if env::var_os("CARGO_FEATURE_FUSE").is_some() {
        enabled_features.push("fuse");
    }

    if enabled_features.is_empty() {
        enabled_features.push("none");
    }

    set_env("BUILD_FEATURES", &enabled_features.join(","));
}

/// Prefer an explicit CI ref, then a git description, then the crate version.
fn report_repository_version() {
    let version = env::var("CI_BUILD_REF")
        .ok()
        .filter(|val| !val.is_empty())
        .or_else(|| command_output("git", &["describe", "--always", "--dirty", "--long", "--tags"]))
        .or_else(|| command_output("git", &["rev-parse", "--short", "HEAD"]))
        .or_else(|| env::var("CARGO_PKG_VERSION").ok())
        .unwrap_or_else(|| "unknown".to_string());

    set_env("REPO_VERSION", &version);
}

fn report_build_timestamp() {
    set_env("BUILD_TIMESTAMP", &chrono::Utc::now().to_rfc3339());
}

fn report_rust_version() {
    let rust_version =
        command_output("rustc", &["--version"]).unwrap_or_else(|| "unknown".to_string());
    set_env("RUST_VERSION", &rust_version);
}

fn report_target_info() {
    if let Ok(target) = env::var("TARGET") {
        set_env("BUILD_TARGET", &target);
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");

    report_build_profile();
    report_enabled_features();
    report_repository_version();
    report_build_timestamp();
    report_rust_version();
    report_target_info();
}
