use std::process::Command;

fn main() {
    // Capture git SHA at build time
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map_or_else(|| "unknown".to_string(), |s| s.trim().to_string());

    println!("cargo:rustc-env=BUILD_VERSION={output}");
    println!(
        "cargo:rustc-env=BUILD_DATE={}",
        chrono::Utc::now().format("%Y-%m-%d")
    );

    let rustc = rustc_version::version()
        .map_or_else(|_| "unknown".to_string(), |v| v.to_string());
    println!("cargo:rustc-env=RUSTC_VERSION={rustc}");

    // Rebuild if git HEAD or the schema changes
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");
    println!("cargo:rerun-if-changed=migrations");
}
