use distill_core::AnalysisResult;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::AnalysisError;
use crate::{AnalysisInput, Analyzer};

/// Replays scripted outcomes per content id (for testing).
///
/// Records without a script get the fallback result, or a parse error
/// when no fallback is set.
pub struct MockAnalyzer {
    scripts: Mutex<HashMap<String, VecDeque<Result<AnalysisResult, AnalysisError>>>>,
    fallback: Option<AnalysisResult>,
    calls: Mutex<Vec<String>>,
}

impl MockAnalyzer {
    pub fn new(fallback: Option<AnalysisResult>) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_results(&self, video_id: &str, results: Vec<Result<AnalysisResult, AnalysisError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(video_id.to_string(), results.into());
    }

    /// Content ids in call order, one entry per attempt.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(
        &self,
        input: &AnalysisInput,
        _template: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.calls.lock().unwrap().push(input.video_id.clone());
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&input.video_id)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AnalysisError::Parse(format!("no script for {}", input.video_id))),
        }
    }

    fn provider(&self) -> String {
        "mock/test".into()
    }
}
