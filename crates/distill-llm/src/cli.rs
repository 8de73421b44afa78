use anyhow::Result;
use distill_core::AnalysisResult;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::process::Command;

use crate::error::AnalysisError;
use crate::parse::parse_output;
use crate::prompt::{PromptLoader, PromptVars};
use crate::{AnalysisInput, Analyzer};

/// Stderr fragments that mean the provider is throttling us.
const RATE_LIMIT_MARKERS: &[&str] = &["exhausted your capacity", "rate limit", "quota", "429"];

/// Temp files older than this are removed by [`CliAnalyzer::cleanup_stale_temp`].
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Runs a headless LLM CLI (`{program} -p "<meta prompt>"`) inside a
/// project directory. The transcript and the rendered instructions are
/// handed over as temp files so the command line stays short.
pub struct CliAnalyzer {
    pub program: String,
    pub extra_args: Vec<String>,
    pub project_dir: PathBuf,
    pub timeout: Duration,
    pub model: String,
    pub prompts: PromptLoader,
    /// When set, each prompt/response exchange is saved here.
    pub conversation_dir: Option<PathBuf>,
}

impl CliAnalyzer {
    pub fn new(program: impl Into<String>, project_dir: impl Into<PathBuf>, prompts: PromptLoader) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            project_dir: project_dir.into(),
            timeout: Duration::from_secs(300),
            model: "default".into(),
            prompts,
            conversation_dir: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_conversation_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.conversation_dir = dir;
        self
    }

    /// Directory holding the transcript/prompt hand-over files.
    pub fn temp_dir(&self) -> PathBuf {
        self.project_dir.join(".distill-tmp")
    }

    pub fn verify_available(&self) -> Result<()> {
        let status = std::process::Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => Ok(()),
            _ => anyhow::bail!(
                "analysis CLI not found (looked for {:?}); set analysis.command in the config",
                self.program
            ),
        }
    }

    /// Remove hand-over files left behind by crashed runs.
    pub fn cleanup_stale_temp(&self) -> usize {
        cleanup_older_than(&self.temp_dir(), STALE_TEMP_AGE, SystemTime::now())
    }

    fn write_temp(&self, prefix: &str, content: &str) -> Result<tempfile::NamedTempFile, AnalysisError> {
        let dir = self.temp_dir();
        std::fs::create_dir_all(&dir)?;
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".md")
            .tempfile_in(&dir)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        Ok(file)
    }

    async fn run(&self, meta_prompt: &str) -> Result<String, AnalysisError> {
        let child = Command::new(&self.program)
            .args(&self.extra_args)
            .arg("-p")
            .arg(meta_prompt)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result?,
            Err(_) => return Err(AnalysisError::Timeout(self.timeout.as_secs())),
        };
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(output.status.code(), stderr))
    }

    fn save_conversation(&self, video_id: &str, prompt: &str, response: &str) {
        let Some(dir) = &self.conversation_dir else {
            return;
        };
        let text = format!(
            "# Analysis exchange\n\n## Prompt\n\n{prompt}\n\n## Response\n\n{response}\n\n---\nGenerated: {}\n",
            distill_core::now_rfc3339()
        );
        let path = dir.join(format!("{video_id}.md"));
        if let Err(e) = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, text)) {
            tracing::warn!(path = %path.display(), error = %e, "failed to save conversation");
        }
    }
}

fn classify_failure(code: Option<i32>, stderr: String) -> AnalysisError {
    let lower = stderr.to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        AnalysisError::RateLimited(stderr)
    } else {
        AnalysisError::Call { code, stderr }
    }
}

fn cleanup_older_than(dir: &Path, max_age: Duration, now: SystemTime) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > max_age);
        if stale && entry.path().is_file() && std::fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(dir = %dir.display(), removed, "removed stale temp files");
    }
    removed
}

fn file_name(file: &tempfile::NamedTempFile) -> String {
    file.path()
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl Analyzer for CliAnalyzer {
    async fn analyze(
        &self,
        input: &AnalysisInput,
        template: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        let transcript = self.write_temp(
            "transcript_",
            &format!(
                "---\nchannel: {}\ntitle: {}\nword_count: {}\n---\n\n{}\n",
                input.channel, input.title, input.word_count, input.content
            ),
        )?;
        let transcript_name = file_name(&transcript);

        let vars = PromptVars {
            channel: input.channel.clone(),
            title: input.title.clone(),
            word_count: input.word_count,
            content_preview: input.content_preview(),
            file_path: format!(".distill-tmp/{transcript_name}"),
        };
        let prompt = self.prompts.format(template, &vars)?;
        let prompt_file = self.write_temp("prompt_task_", &prompt)?;

        let meta_prompt = format!(
            "Read .distill-tmp/{} and follow its instructions to analyze .distill-tmp/{}, then output the JSON result.",
            file_name(&prompt_file),
            transcript_name
        );
        tracing::debug!(video_id = %input.video_id, template, "invoking analysis CLI");
        let raw = self.run(&meta_prompt).await?;
        self.save_conversation(&input.video_id, &prompt, &raw);

        // Temp files are removed when `transcript` and `prompt_file` drop.
        parse_output(&raw)
    }

    fn provider(&self) -> String {
        let name = Path::new(&self.program)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.clone());
        format!("{name}/{}", self.model)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    const VALID: &str = r#"{"semantic_summary":"s","key_topics":["a"],"content_type":"news","content_density":"low","temporal_relevance":"news","segments":[]}"#;

    /// Shell script standing in for the LLM CLI, run as `sh fake-llm.sh -p <prompt>`.
    fn fake_cli(dir: &Path, script: &str) -> String {
        let path = dir.join("fake-llm.sh");
        fs::write(&path, format!("{script}\n")).unwrap();
        path.to_string_lossy().to_string()
    }

    fn analyzer(dir: &Path, script: &str) -> CliAnalyzer {
        let prompts = dir.join("prompts");
        fs::create_dir_all(prompts.join("analysis")).unwrap();
        fs::write(prompts.join("analysis/default.md"), "Analyze {file_path} from {channel}").unwrap();
        CliAnalyzer::new("sh", dir, PromptLoader::new(prompts))
            .with_args(vec![fake_cli(dir, script)])
            .with_model("test")
    }

    fn input() -> AnalysisInput {
        AnalysisInput {
            video_id: "abcdefghijk".into(),
            channel: "Bankless".into(),
            title: "ERC".into(),
            word_count: 3,
            content: "one two three".into(),
        }
    }

    #[tokio::test]
    async fn successful_run_is_parsed_and_temp_cleaned() {
        let tmp = tempfile::tempdir().unwrap();
        let a = analyzer(tmp.path(), &format!("echo '```json'\necho '{VALID}'\necho '```'"));
        let result = a.analyze(&input(), "default").await.unwrap();
        assert_eq!(result.semantic_summary, "s");
        let leftovers = fs::read_dir(a.temp_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
        assert_eq!(a.provider(), "sh/test");
    }

    #[tokio::test]
    async fn meta_prompt_names_existing_files() {
        let tmp = tempfile::tempdir().unwrap();
        // The script reads the prompt file named in its -p argument.
        let script = format!(
            "f=$(echo \"$2\" | sed -e 's/^Read \\([^ ]*\\) .*/\\1/')\ngrep -q 'from Bankless' \"$f\" || exit 3\necho '{VALID}'"
        );
        let a = analyzer(tmp.path(), &script);
        assert!(a.analyze(&input(), "default").await.is_ok());
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let tmp = tempfile::tempdir().unwrap();
        let a = analyzer(tmp.path(), "echo 'You have exhausted your capacity' >&2\nexit 1");
        let err = a.analyze(&input(), "default").await.unwrap_err();
        assert!(matches!(err, AnalysisError::RateLimited(_)));
        assert!(err.kind().is_retryable());
    }

    #[tokio::test]
    async fn other_failure_is_permanent() {
        let tmp = tempfile::tempdir().unwrap();
        let a = analyzer(tmp.path(), "echo 'bad flag' >&2\nexit 2");
        let err = a.analyze(&input(), "default").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Call { code: Some(2), .. }));
        assert!(!err.kind().is_retryable());
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let tmp = tempfile::tempdir().unwrap();
        let a = analyzer(tmp.path(), "sleep 5").with_timeout(Duration::from_millis(200));
        let err = a.analyze(&input(), "default").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Timeout(_)));
        assert!(err.kind().is_retryable());
    }

    #[tokio::test]
    async fn conversation_is_saved() {
        let tmp = tempfile::tempdir().unwrap();
        let conv = tmp.path().join("conversations");
        let a = analyzer(tmp.path(), &format!("echo '{VALID}'"))
            .with_conversation_dir(Some(conv.clone()));
        a.analyze(&input(), "default").await.unwrap();
        let saved = fs::read_to_string(conv.join("abcdefghijk.md")).unwrap();
        assert!(saved.contains("## Response"));
        assert!(crate::parse::parse_output(&saved).is_ok());
    }

    #[test]
    fn cleanup_removes_only_old_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("old.md"), "x").unwrap();
        let later = SystemTime::now() + Duration::from_secs(25 * 60 * 60);
        assert_eq!(cleanup_older_than(tmp.path(), STALE_TEMP_AGE, SystemTime::now()), 0);
        assert_eq!(cleanup_older_than(tmp.path(), STALE_TEMP_AGE, later), 1);
        assert!(!tmp.path().join("old.md").exists());
    }
}
