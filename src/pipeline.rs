use crate::error::Result;
use crate::llm::{GenerationClient, TokenUsage};
use crate::parser::ResponseParser;
use crate::prompt::PromptBuilder;
use crate::questions::Question;
use crate::schema::SchemaRegistry;
use crate::store::ResultStore;
use itertools::Itertools;
use std::time::Instant;
use tracing::{info, warn};

/// Aggregate statistics for one run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub success: usize,
    pub avg_confidence: f64,
    pub source_counts: Vec<(String, usize)>,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub avg_latency_secs: f64,
    pub elapsed_secs: f64,
}

/// The orchestration fold: for each question, build a prompt, call the
/// model, parse the reply, append the result. Sequential by design; each
/// question runs to completion before the next, so rate limits and errors
/// attribute cleanly to one question.
pub struct Pipeline<'a> {
    registry: &'a SchemaRegistry,
    client: &'a GenerationClient,
    builder: PromptBuilder,
    parser: ResponseParser,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a SchemaRegistry, client: &'a GenerationClient) -> Self {
        Self {
            registry,
            client,
            builder: PromptBuilder::new(registry),
            parser: ResponseParser::new(registry),
        }
    }

    /// Process every question and return the full result set plus run
    /// statistics. Generation and parse failures degrade to a per-question
    /// result; they never abort the batch.
    pub async fn run(&self, questions: &[Question]) -> Result<(ResultStore, RunSummary)> {
        let mut store = ResultStore::new();
        let mut usage_log: Vec<TokenUsage> = Vec::new();
        let mut latencies: Vec<f64> = Vec::new();
        let run_start = Instant::now();

        for (idx, question) in questions.iter().enumerate() {
            info!(
                "[{}/{}] Processing question {}: {}",
                idx + 1,
                questions.len(),
                question.question_id,
                question.question
            );

            let result = self.process_one(question, &mut usage_log, &mut latencies).await?;

            if result.confidence >= 0.8 {
                info!("  ✓ Q{} confident ({:.2})", question.question_id, result.confidence);
            } else if result.confidence > 0.0 {
                info!("  ⚠ Q{} unsure ({:.2})", question.question_id, result.confidence);
            } else {
                warn!("  ✗ Q{} could not generate", question.question_id);
            }

            store.append(result);
        }

        let summary = self.summarize(&store, &usage_log, &latencies, run_start.elapsed().as_secs_f64());
        Ok((store, summary))
    }

    async fn process_one(
        &self,
        question: &Question,
        usage_log: &mut Vec<TokenUsage>,
        latencies: &mut Vec<f64>,
    ) -> Result<crate::parser::GenerationResult> {
        let request = self.builder.build(question, self.registry)?;

        let start = Instant::now();
        match self.client.generate(&request).await {
            Ok(completion) => {
                latencies.push(start.elapsed().as_secs_f64());
                if let Some(usage) = completion.usage {
                    usage_log.push(usage);
                }
                Ok(self.parser.parse(question, &completion.content))
            }
            Err(e) => {
                latencies.push(start.elapsed().as_secs_f64());
                warn!("Generation failed for question {}: {}", question.question_id, e);
                Ok(self
                    .parser
                    .degraded(question, &format!("System error: {}", e)))
            }
        }
    }

    fn summarize(
        &self,
        store: &ResultStore,
        usage_log: &[TokenUsage],
        latencies: &[f64],
        elapsed_secs: f64,
    ) -> RunSummary {
        let results = store.all();
        let total = results.len();
        let success = results.iter().filter(|r| r.confidence > 0.0).count();
        let avg_confidence = if total > 0 {
            results.iter().map(|r| r.confidence).sum::<f64>() / total as f64
        } else {
            0.0
        };

        let source_counts = results
            .iter()
            .map(|r| r.target_source.clone())
            .counts()
            .into_iter()
            .sorted()
            .collect();

        let avg_latency_secs = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        RunSummary {
            total,
            success,
            avg_confidence,
            source_counts,
            total_prompt_tokens: usage_log.iter().map(|u| u.prompt_tokens).sum(),
            total_completion_tokens: usage_log.iter().map(|u| u.completion_tokens).sum(),
            avg_latency_secs,
            elapsed_secs,
        }
    }
}

impl RunSummary {
    pub fn log(&self) {
        info!("📊 Run complete in {:.1}s", self.elapsed_secs);
        info!(
            "  Generated: {}/{} ({:.1}%)",
            self.success,
            self.total,
            if self.total > 0 {
                self.success as f64 / self.total as f64 * 100.0
            } else {
                0.0
            }
        );
        info!("  Average confidence: {:.3}", self.avg_confidence);
        if self.total_prompt_tokens > 0 {
            info!(
                "  Tokens: {} prompt + {} completion",
                self.total_prompt_tokens, self.total_completion_tokens
            );
            info!("  Avg latency per query: {:.2}s", self.avg_latency_secs);
        }
        for (source, count) in &self.source_counts {
            info!("  {}: {}", source, count);
        }
    }
}
