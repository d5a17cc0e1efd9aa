//! Packet-capture evidence kept next to the test log.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// File name for the capture of `test_name`.
///
/// Characters other than word characters, whitespace and `-` become `_`,
/// then every run of underscores and whitespace collapses to one `_`.
pub fn capture_file_name(test_name: &str) -> String {
    let replaced: String = test_name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' || c.is_whitespace() {
                c
            } else {
                '_'
            }
        })
        .collect();
    let raw = format!("{}_dump.pcap", replaced);

    let mut name = String::with_capacity(raw.len());
    let mut in_run = false;
    for c in raw.chars() {
        if c == '_' || c.is_whitespace() {
            if !in_run {
                name.push('_');
            }
            in_run = true;
        } else {
            name.push(c);
            in_run = false;
        }
    }
    name
}

/// Copy `capture` into the directory holding `log_file`.
///
/// Returns the destination, or `None` when there is no capture or no log
/// directory to put it in.
pub fn save_capture(capture: &Path, log_file: Option<&Path>, test_name: &str) -> Result<Option<PathBuf>> {
    if !capture.is_file() {
        warn!(path = %capture.display(), "no capture file found");
        return Ok(None);
    }
    let Some(log_file) = log_file else {
        info!("log directory not set, skipping capture export");
        return Ok(None);
    };

    let log_file = if log_file.is_absolute() {
        log_file.to_path_buf()
    } else {
        std::env::current_dir()
            .context("failed to resolve current directory")?
            .join(log_file)
    };
    let log_dir = log_file.parent().unwrap_or_else(|| Path::new("."));
    let dst = log_dir.join(capture_file_name(test_name));
    debug!(dst = %dst.display(), "saving capture");
    std::fs::copy(capture, &dst)
        .with_context(|| format!("failed to copy {} to {}", capture.display(), dst.display()))?;
    Ok(Some(dst))
}
