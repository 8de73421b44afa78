use std::path::{Path, PathBuf};

use crate::error::AnalysisError;

const DEFAULT_TEMPLATE: &str = "default";
const TASK_DIR: &str = "analysis";

/// Values substituted into a template.
#[derive(Debug, Clone, Default)]
pub struct PromptVars {
    pub channel: String,
    pub title: String,
    pub word_count: u64,
    pub content_preview: String,
    /// Name of the transcript file the tool should read.
    pub file_path: String,
}

impl PromptVars {
    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "channel" => Some(self.channel.clone()),
            "title" => Some(self.title.clone()),
            "word_count" => Some(self.word_count.to_string()),
            "content_preview" => Some(self.content_preview.clone()),
            "file_path" => Some(self.file_path.clone()),
            _ => None,
        }
    }
}

/// Loads `{dir}/analysis/{name}.md`, falling back to `default.md`.
#[derive(Debug, Clone)]
pub struct PromptLoader {
    dir: PathBuf,
}

impl PromptLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn template_path(&self, name: &str) -> PathBuf {
        self.dir.join(TASK_DIR).join(format!("{name}.md"))
    }

    pub fn load(&self, name: &str) -> Result<String, AnalysisError> {
        let path = self.template_path(name);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(_) if name != DEFAULT_TEMPLATE => {
                tracing::warn!(template = name, "template missing, using default");
                self.load(DEFAULT_TEMPLATE)
            }
            Err(_) => Err(AnalysisError::TemplateNotFound(path)),
        }
    }

    /// Load `name` and fill in its placeholders.
    pub fn format(&self, name: &str, vars: &PromptVars) -> Result<String, AnalysisError> {
        Ok(render(&self.load(name)?, vars))
    }

    /// Template names available under the analysis directory.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.join(TASK_DIR))
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
            .filter_map(|p| file_stem(&p))
            .collect();
        names.sort();
        names
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}

/// Replace `{name}` placeholders with known variables. Doubled braces
/// (`{{ ... }}`) and unknown names are left as written.
pub fn render(template: &str, vars: &PromptVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        if tail.starts_with("{{") {
            out.push_str("{{");
            rest = &tail[2..];
            continue;
        }
        let substituted = tail[1..].find('}').and_then(|close| {
            let name = &tail[1..1 + close];
            let after = &tail[close + 2..];
            if after.starts_with('}') {
                return None;
            }
            vars.lookup(name).map(|value| (value, after))
        });
        match substituted {
            Some((value, after)) => {
                out.push_str(&value);
                rest = after;
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn vars() -> PromptVars {
        PromptVars {
            channel: "Bankless".into(),
            title: "ERC-8004".into(),
            word_count: 1200,
            content_preview: "So what exactly".into(),
            file_path: "transcript_x.md".into(),
        }
    }

    #[test]
    fn render_substitutes_known_names() {
        let out = render(
            "Channel {channel}, {word_count} words in {file_path}: {content_preview} / {title}",
            &vars(),
        );
        assert_eq!(
            out,
            "Channel Bankless, 1200 words in transcript_x.md: So what exactly / ERC-8004"
        );
    }

    #[test]
    fn render_keeps_doubled_braces_and_unknowns() {
        let out = render(r#"{{channel}} {"key": "{unknown}"} {channel}"#, &vars());
        assert_eq!(out, r#"{{channel}} {"key": "{unknown}"} Bankless"#);
        assert_eq!(render("open { brace", &vars()), "open { brace");
        assert_eq!(render("{title}}", &vars()), "{title}}");
    }

    #[test]
    fn load_falls_back_to_default() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("analysis");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("default.md"), "default for {channel}").unwrap();
        fs::write(dir.join("crypto_tech.md"), "crypto for {channel}").unwrap();

        let loader = PromptLoader::new(tmp.path());
        assert_eq!(loader.format("crypto_tech", &vars()).unwrap(), "crypto for Bankless");
        assert_eq!(loader.format("missing", &vars()).unwrap(), "default for Bankless");
        assert_eq!(loader.list(), vec!["crypto_tech", "default"]);
    }

    #[test]
    fn load_without_default_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = PromptLoader::new(tmp.path());
        assert!(matches!(
            loader.load("anything"),
            Err(AnalysisError::TemplateNotFound(_))
        ));
    }
}
