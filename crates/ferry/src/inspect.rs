// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ferry channels` and `ferry jobs` command implementations.
//!
//! Read the catalog database directly, so they work whether or not a
//! `ferry serve` process is running. `--json` prints structured output for
//! scripting; `--plain` or a non-TTY stdout disables colors.

use std::io::IsTerminal;

use chrono::{DateTime, Utc};
use ferry_config::model::FerryConfig;
use ferry_core::{BackfillJob, CatalogStore, Channel, FerryError, JobStatus, JobStore};
use ferry_storage::SqliteStorage;
use serde::Serialize;

/// Run the `ferry channels` command.
pub async fn run_channels(config: &FerryConfig, json: bool, plain: bool) -> Result<(), FerryError> {
    let storage = SqliteStorage::open(&config.storage).await?;
    let channels = storage.load_channels().await?;

    if json {
        print_json(&channels)?;
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print!("{}", render_channels(&channels, use_color));
    }
    Ok(())
}

/// Run the `ferry jobs` command.
pub async fn run_jobs(config: &FerryConfig, json: bool, plain: bool) -> Result<(), FerryError> {
    let storage = SqliteStorage::open(&config.storage).await?;
    let mut jobs = storage.load_jobs().await?;
    jobs.sort_by_key(|job| job.channel_id);

    if json {
        print_json(&jobs)?;
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print!("{}", render_jobs(&jobs, use_color));
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), FerryError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| FerryError::Internal(format!("failed to serialize output: {e}")))?;
    println!("{text}");
    Ok(())
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string())
}

fn render_channels(channels: &[Channel], use_color: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n  ferry channels ({})\n", channels.len()));
    out.push_str(&format!("  {}\n", "-".repeat(72)));

    if channels.is_empty() {
        out.push_str("    no channels discovered yet; run `ferry sync`\n\n");
        return out;
    }

    out.push_str(&format!(
        "    {:<14} {:<10} {:<8} {:>10}  {:<16}  {}\n",
        "ID", "GROUP", "STATE", "CURSOR", "LAST SYNC", "NAME"
    ));
    for channel in channels {
        let state = if channel.enabled { "enabled" } else { "disabled" };
        let state = if use_color {
            use colored::Colorize;
            let padded = format!("{state:<8}");
            if channel.enabled {
                padded.green().to_string()
            } else {
                padded.dimmed().to_string()
            }
        } else {
            format!("{state:<8}")
        };
        out.push_str(&format!(
            "    {:<14} {:<10} {} {:>10}  {:<16}  {}\n",
            channel.id.to_string(),
            channel.group_tag,
            state,
            channel.cursor,
            format_time(channel.last_synced_at),
            channel.name
        ));
    }
    out.push('\n');
    out
}

fn render_jobs(jobs: &[BackfillJob], use_color: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n  ferry jobs ({})\n", jobs.len()));
    out.push_str(&format!("  {}\n", "-".repeat(72)));

    if jobs.is_empty() {
        out.push_str("    no backfill jobs\n\n");
        return out;
    }

    out.push_str(&format!(
        "    {:<14} {:<18} {:>10} {:>10} {:>8}  {}\n",
        "CHANNEL", "STATUS", "FROM", "TO", "ATTEMPTS", "LAST ERROR"
    ));
    for job in jobs {
        let status = format!("{:<18}", job.status.to_string());
        let status = if use_color {
            use colored::Colorize;
            match job.status {
                JobStatus::Completed => status.green().to_string(),
                JobStatus::Failed => status.red().to_string(),
                JobStatus::PausedFloodWait => status.yellow().to_string(),
                _ => status,
            }
        } else {
            status
        };
        let to = job
            .to_seq
            .map_or_else(|| "head".to_string(), |seq| seq.to_string());
        out.push_str(&format!(
            "    {:<14} {} {:>10} {:>10} {:>8}  {}\n",
            job.channel_id.to_string(),
            status,
            job.from_seq,
            to,
            job.attempts,
            job.last_error.as_deref().unwrap_or("-")
        ));
    }
    out.push('\n');
    out
}
