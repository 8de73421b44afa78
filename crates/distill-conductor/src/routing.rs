//! Maps a record to its instruction template and target notebook.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Suggested topic meaning "the analyzer could not classify this".
pub const UNKNOWN_TOPIC: &str = "unknown";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Topic {
    pub name: String,
    pub description: String,
    pub notebook: String,
    pub prompt_template: Option<String>,
    /// Channels whose records default to this topic.
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelRule {
    pub default_topic: Option<String>,
    pub prompt_template: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Routing {
    pub topics: BTreeMap<String, Topic>,
    pub channels: BTreeMap<String, ChannelRule>,
    pub default_notebook: String,
    pub unclassified_notebook: String,
    pub default_template: String,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            topics: BTreeMap::new(),
            channels: BTreeMap::new(),
            default_notebook: "Inbox".into(),
            unclassified_notebook: "Unclassified".into(),
            default_template: "default".into(),
        }
    }
}

impl Routing {
    /// The channel's default topic id: explicit rule first, then the first
    /// topic listing the channel.
    pub fn channel_topic(&self, channel: &str) -> Option<&str> {
        if let Some(id) = self
            .channels
            .get(channel)
            .and_then(|rule| rule.default_topic.as_deref())
            .filter(|id| self.topics.contains_key(*id))
        {
            return Some(id);
        }
        self.topics
            .iter()
            .find(|(_, t)| t.channels.iter().any(|c| c == channel))
            .map(|(id, _)| id.as_str())
    }

    /// Instruction template for records of `channel`.
    pub fn template_for(&self, channel: &str) -> &str {
        let rule = self
            .channels
            .get(channel)
            .and_then(|r| r.prompt_template.as_deref());
        let topic = || {
            self.channel_topic(channel)
                .and_then(|id| self.topics.get(id))
                .and_then(|t| t.prompt_template.as_deref())
        };
        rule.or_else(topic).unwrap_or(&self.default_template)
    }

    /// Notebook a record is linked into.
    ///
    /// A known suggested topic wins, `unknown` goes to the unclassified
    /// notebook, anything else falls back to the channel's default topic
    /// and finally the default notebook.
    pub fn notebook_for(&self, suggested_topic: Option<&str>, channel: &str) -> &str {
        let suggested = suggested_topic.map(str::trim).filter(|t| !t.is_empty());
        if let Some(topic) = suggested.and_then(|id| self.topics.get(id)) {
            return &topic.notebook;
        }
        if suggested == Some(UNKNOWN_TOPIC) {
            return &self.unclassified_notebook;
        }
        self.channel_topic(channel)
            .and_then(|id| self.topics.get(id))
            .map(|t| t.notebook.as_str())
            .unwrap_or(&self.default_notebook)
    }

    /// Problems that make the routing unusable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (id, topic) in &self.topics {
            if topic.notebook.trim().is_empty() {
                problems.push(format!("topic `{id}` has no notebook"));
            }
        }
        for (channel, rule) in &self.channels {
            if let Some(id) = &rule.default_topic {
                if !self.topics.contains_key(id) {
                    problems.push(format!("channel `{channel}` refers to unknown topic `{id}`"));
                }
            }
        }
        if self.default_notebook.trim().is_empty() {
            problems.push("default notebook is empty".into());
        }
        problems
    }
}
