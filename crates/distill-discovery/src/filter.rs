use distill_core::PipelineStatus;

/// Configured record filters.
#[derive(Debug, Clone)]
pub struct Filters {
    pub min_word_count: u64,
    /// When non-empty, only these channels are processed.
    pub channel_allow: Vec<String>,
    pub channel_deny: Vec<String>,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            min_word_count: 100,
            channel_allow: Vec::new(),
            channel_deny: Vec::new(),
        }
    }
}

/// Everything the decision looks at for one record.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    pub status: PipelineStatus,
    pub artifact_exists: bool,
    pub channel: &'a str,
    pub word_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyProcessed(PipelineStatus),
    RequiresReset,
    AlreadyAnalyzed,
    TooSmall { word_count: u64, min: u64 },
    ChannelNotAllowed,
    ChannelDenied,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyProcessed(status) => write!(f, "already processed ({status})"),
            SkipReason::RequiresReset => f.write_str("failed, requires manual reset"),
            SkipReason::AlreadyAnalyzed => f.write_str("already analyzed"),
            SkipReason::TooSmall { word_count, min } => {
                write!(f, "too small ({word_count} < {min} words)")
            }
            SkipReason::ChannelNotAllowed => f.write_str("channel not in allow-list"),
            SkipReason::ChannelDenied => f.write_str("channel in deny-list"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Process,
    Skip(SkipReason),
}

/// Process/skip decision. First matching rule wins:
/// processed status, failed status, existing artifact, size, channel.
pub fn decide(record: &RecordView<'_>, filters: &Filters) -> Decision {
    match record.status {
        PipelineStatus::Pending | PipelineStatus::Uploaded => {
            return Decision::Skip(SkipReason::AlreadyProcessed(record.status))
        }
        PipelineStatus::Failed => return Decision::Skip(SkipReason::RequiresReset),
        PipelineStatus::Unprocessed => {}
    }
    if record.artifact_exists {
        return Decision::Skip(SkipReason::AlreadyAnalyzed);
    }
    if record.word_count < filters.min_word_count {
        return Decision::Skip(SkipReason::TooSmall {
            word_count: record.word_count,
            min: filters.min_word_count,
        });
    }
    if !filters.channel_allow.is_empty()
        && !filters.channel_allow.iter().any(|c| c == record.channel)
    {
        return Decision::Skip(SkipReason::ChannelNotAllowed);
    }
    if filters.channel_deny.iter().any(|c| c == record.channel) {
        return Decision::Skip(SkipReason::ChannelDenied);
    }
    Decision::Process
}
