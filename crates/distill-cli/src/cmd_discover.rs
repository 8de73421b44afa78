use anyhow::Result;
use distill_discovery::discover;

use crate::config::Config;

/// `distill discover`: show what the next run would pick up. Read-only.
pub fn execute(config: &Config, min_words: Option<u64>, channels: &[String], json: bool) -> Result<()> {
    let filters = config.filters(min_words, channels);
    let found = discover(
        &config.paths.corpus,
        &config.scan_patterns()?,
        &filters,
        &config.layout(),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&found.stats)?);
        return Ok(());
    }

    for c in &found.candidates {
        println!(
            "  {}  {} | {} ({} words)",
            c.meta.video_id, c.meta.channel, c.meta.title, c.meta.word_count
        );
    }
    for (path, reason) in &found.invalid {
        println!("  ! {}: {reason}", path.display());
    }
    let s = &found.stats;
    println!(
        "Scanned {}: {} ready, {} invalid, skipped {} by status, {} by artifact, {} by size, {} by channel",
        s.total_scanned,
        s.ready_to_process,
        s.parsed_failed,
        s.filtered_by_status,
        s.filtered_by_artifact,
        s.filtered_by_word_count,
        s.filtered_by_channel,
    );
    Ok(())
}
