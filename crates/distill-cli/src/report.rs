use distill_conductor::{BatchReport, Outcome};

/// Print one line per record plus a summary line.
pub fn print_batch(stage: &str, report: &BatchReport) {
    for r in &report.records {
        match &r.outcome {
            Outcome::Analyzed {
                segments_placed,
                segments_dropped,
                retries,
            } => println!(
                "  ✓ {} analyzed ({segments_placed} segments, {segments_dropped} dropped, {retries} retries)",
                r.video_id
            ),
            Outcome::Uploaded {
                source_id,
                notebook,
                retries,
            } => println!("  ✓ {} → {notebook} ({source_id}, {retries} retries)", r.video_id),
            Outcome::DryRun { notebook } => {
                println!("  · {} would be uploaded to {notebook}", r.video_id)
            }
            Outcome::Failed { code, error, .. } => {
                println!("  ✗ {} failed [{code}] {error}", r.video_id)
            }
        }
    }
    println!(
        "{stage}: {} succeeded, {} failed{}",
        report.succeeded(),
        report.failed(),
        match &report.aborted {
            Some(reason) => format!(", aborted ({reason}), {} not started", report.not_started),
            None => String::new(),
        }
    );
}

/// Non-zero exit for a pass stopped by the circuit breaker.
pub fn check_breaker(report: &BatchReport) -> anyhow::Result<()> {
    if report.breaker_tripped() {
        anyhow::bail!("run aborted by the circuit breaker");
    }
    Ok(())
}
