use crate::error::{PipelineError, Result};
use crate::parser::GenerationResult;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Paths actually produced by a write. Formats are independent best-effort
/// outputs: a failed JSON write does not roll back an already-written CSV.
#[derive(Debug, Default)]
pub struct WrittenArtifacts {
    pub csv: Option<PathBuf>,
    pub json: Option<PathBuf>,
    pub markdown: Option<PathBuf>,
}

impl WrittenArtifacts {
    pub fn paths(&self) -> Vec<&PathBuf> {
        [&self.csv, &self.json, &self.markdown]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Serializes a result set to CSV, JSON and a Markdown report.
///
/// The three artifacts are different views of the same records and must be
/// field-for-field consistent; each is serialized from the same
/// `GenerationResult` values in the same order.
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Write `<prefix>.csv`, `<prefix>.json` and `<prefix>.md` under the
    /// output directory. Failing to create the directory is fatal; after
    /// that, each format is attempted independently and all failures are
    /// reported together.
    pub fn write(&self, results: &[GenerationResult], prefix: &str) -> Result<WrittenArtifacts> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            PipelineError::Write(format!(
                "Failed to create output directory {}: {}",
                self.output_dir.display(),
                e
            ))
        })?;

        let mut artifacts = WrittenArtifacts::default();
        let mut failures: Vec<String> = Vec::new();

        let csv_path = self.output_dir.join(format!("{}.csv", prefix));
        match self.write_csv(results, &csv_path) {
            Ok(()) => {
                info!("Wrote {}", csv_path.display());
                artifacts.csv = Some(csv_path);
            }
            Err(e) => {
                error!("CSV write failed: {}", e);
                failures.push(format!("{}: {}", csv_path.display(), e));
            }
        }

        let json_path = self.output_dir.join(format!("{}.json", prefix));
        match self.write_json(results, &json_path) {
            Ok(()) => {
                info!("Wrote {}", json_path.display());
                artifacts.json = Some(json_path);
            }
            Err(e) => {
                error!("JSON write failed: {}", e);
                failures.push(format!("{}: {}", json_path.display(), e));
            }
        }

        let md_path = self.output_dir.join(format!("{}.md", prefix));
        match self.write_markdown(results, &md_path) {
            Ok(()) => {
                info!("Wrote {}", md_path.display());
                artifacts.markdown = Some(md_path);
            }
            Err(e) => {
                error!("Markdown report write failed: {}", e);
                failures.push(format!("{}: {}", md_path.display(), e));
            }
        }

        if !failures.is_empty() {
            return Err(PipelineError::Write(failures.join("; ")));
        }
        Ok(artifacts)
    }

    fn write_csv(&self, results: &[GenerationResult], path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for result in results {
            writer.serialize(result)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_json(&self, results: &[GenerationResult], path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn write_markdown(&self, results: &[GenerationResult], path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str("# SQL Generation Report\n\n");
        out.push_str(&format!(
            "**Generated on**: {}\n\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        let total = results.len();
        let success = results.iter().filter(|r| r.confidence > 0.0).count();
        let high = results.iter().filter(|r| r.confidence >= 0.8).count();
        let rate = if total > 0 {
            success as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        out.push_str("## Executive Summary\n");
        out.push_str(&format!("- Total Questions: **{}**\n", total));
        out.push_str(&format!("- Successfully Generated: **{}**\n", success));
        out.push_str(&format!("- High Confidence (>=0.8): **{}**\n", high));
        out.push_str(&format!("- Success Rate: **{:.1}%**\n\n", rate));

        let low_conf: Vec<&GenerationResult> =
            results.iter().filter(|r| r.confidence < 0.5).take(3).collect();
        if !low_conf.is_empty() {
            out.push_str("## Low Confidence Cases\n");
            for r in &low_conf {
                out.push_str(&format!("\n### Question {}: {}\n", r.question_id, r.question));
                out.push_str(&format!("- **Confidence**: `{}`\n", r.confidence));
                out.push_str(&format!("- **Assumptions**: {}\n", r.assumptions));
            }
            out.push('\n');
        }

        out.push_str("## Full Query Results\n");
        for r in results {
            out.push_str(&format!("\n### Question {}: {}\n", r.question_id, r.question));
            out.push_str(&format!("- **Target Source**: `{}`\n", r.target_source));
            out.push_str(&format!("- **Confidence**: `{}`\n", r.confidence));
            out.push_str(&format!("- **Assumptions**: {}\n", r.assumptions));
            out.push_str(&format!("\n**SQL**:\n```sql\n{}\n```\n\n---\n", r.sql));
        }

        std::fs::write(path, out)?;
        Ok(())
    }
}
