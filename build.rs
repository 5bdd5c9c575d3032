use anyhow::{Context, Result};
use chrono::TimeZone;
use std::env;
use std::fs;
use std::process::Command;
use vergen_gitcl::{Emitter, GitclBuilder};

fn main() -> Result<()> {
    // Generate git information
    let gitcl = GitclBuilder::default()
        .describe(true, true, Some("[0-9]*"))
        .build()?;

    let gitcl_res = Emitter::default()
        .idempotent()
        .fail_on_error()
        .add_instructions(&gitcl)
        .and_then(|emitter| emitter.emit());

    if let Err(e) = gitcl_res {
        eprintln!("error occurred while generating instructions: {e:?}");
        Emitter::default().idempotent().fail_on_error().emit()?;
    }

    // Reproducible builds pin the timestamp
    let now = match env::var("SOURCE_DATE_EPOCH") {
        Ok(val) => {
            let secs = val.parse::<i64>().context("SOURCE_DATE_EPOCH is not a number")?;
            chrono::Utc
                .timestamp_opt(secs, 0)
                .single()
                .context("SOURCE_DATE_EPOCH out of range")?
        }
        Err(_) => chrono::Utc::now(),
    };

    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let nut_version = nut_version_from_metadata()
        .or_else(|_| nut_version_from_manifest())
        .unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=NUT_VERSION={nut_version}");

    println!("cargo:rerun-if-changed=nut/Cargo.toml");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    Ok(())
}

/// Version of the `nut` package as resolved by cargo, local or published.
fn nut_version_from_metadata() -> Result<String> {
    let output = Command::new(env::var("CARGO").unwrap_or_else(|_| "cargo".to_string()))
        .args(["metadata", "--format-version", "1"])
        .output()?;

    if !output.status.success() {
        anyhow::bail!("cargo metadata failed");
    }

    let metadata: serde_json::Value = serde_json::from_slice(&output.stdout)?;

    metadata["packages"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|package| package["name"].as_str() == Some("nut"))
        .and_then(|package| package["version"].as_str())
        .map(str::to_string)
        .context("nut package not found in metadata")
}

fn nut_version_from_manifest() -> Result<String> {
    let manifest = fs::read_to_string("nut/Cargo.toml")?;

    manifest
        .lines()
        .map(str::trim)
        .find_map(|line| {
            let value = line.strip_prefix("version")?.trim_start().strip_prefix('=')?;
            Some(value.trim().trim_matches('"').to_string())
        })
        .context("Could not find version in nut/Cargo.toml")
}
