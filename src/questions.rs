use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question_id: u32,
    pub question: String,
}

/// Ordered set of business questions, loaded once from CSV.
///
/// Iteration order equals the order of appearance in the source file;
/// question_id is used for lookup and report ordering, not derived from
/// position.
#[derive(Debug)]
pub struct QuestionSet {
    questions: Vec<Question>,
}

impl QuestionSet {
    /// Load questions from a CSV file with `question_id` and `question`
    /// headers. Missing fields, unparseable ids, and duplicate ids all
    /// fail the load with the offending row identified.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path).map_err(|e| {
            PipelineError::MalformedInput(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let headers = reader
            .headers()
            .map_err(|e| {
                PipelineError::MalformedInput(format!(
                    "Failed to read headers of {}: {}",
                    path.display(),
                    e
                ))
            })?
            .clone();
        let id_idx = headers.iter().position(|h| h == "question_id").ok_or_else(|| {
            PipelineError::MalformedInput(format!(
                "{}: missing required column 'question_id'",
                path.display()
            ))
        })?;
        let text_idx = headers.iter().position(|h| h == "question").ok_or_else(|| {
            PipelineError::MalformedInput(format!(
                "{}: missing required column 'question'",
                path.display()
            ))
        })?;

        let mut questions = Vec::new();
        let mut seen_ids = HashSet::new();
        for (row_num, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                PipelineError::MalformedInput(format!(
                    "{} row {}: {}",
                    path.display(),
                    row_num + 1,
                    e
                ))
            })?;

            let raw_id = record.get(id_idx).unwrap_or("").trim();
            let text = record.get(text_idx).unwrap_or("").trim();

            if raw_id.is_empty() {
                return Err(PipelineError::MalformedInput(format!(
                    "{} row {}: empty question_id",
                    path.display(),
                    row_num + 1
                )));
            }
            if text.is_empty() {
                return Err(PipelineError::MalformedInput(format!(
                    "{} row {}: empty question text",
                    path.display(),
                    row_num + 1
                )));
            }

            let question_id: u32 = raw_id.parse().map_err(|_| {
                PipelineError::MalformedInput(format!(
                    "{} row {}: question_id '{}' is not an integer",
                    path.display(),
                    row_num + 1,
                    raw_id
                ))
            })?;
            if !seen_ids.insert(question_id) {
                return Err(PipelineError::MalformedInput(format!(
                    "{}: duplicate question_id {}",
                    path.display(),
                    question_id
                )));
            }

            questions.push(Question {
                question_id,
                question: text.to_string(),
            });
        }

        Ok(Self { questions })
    }

    pub fn from_questions(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    pub fn all(&self) -> &[Question] {
        &self.questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Questions whose id appears in `ids`, in file order.
    pub fn select(&self, ids: &[u32]) -> Vec<Question> {
        self.questions
            .iter()
            .filter(|q| ids.contains(&q.question_id))
            .cloned()
            .collect()
    }
}

/// Parse a selection expression like "1-6", "1,5,7" or "15-20,25" into a
/// sorted list of question ids. Invalid or out-of-bounds parts are skipped
/// with a warning; an empty expression selects every question.
pub fn parse_selection(selection: &str, ids: &[u32]) -> Vec<u32> {
    let selection = selection.trim();
    if selection.is_empty() {
        let mut all: Vec<u32> = ids.to_vec();
        all.sort_unstable();
        return all;
    }

    let known: HashSet<u32> = ids.iter().copied().collect();
    let mut selected = HashSet::new();

    for part in selection.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            match (start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
                (Ok(start), Ok(end)) if start <= end => {
                    for id in start..=end {
                        if known.contains(&id) {
                            selected.insert(id);
                        } else {
                            warn!("Selection id {} not in question set, skipping", id);
                        }
                    }
                }
                _ => warn!("Invalid selection range: {}", part),
            }
        } else {
            match part.parse::<u32>() {
                Ok(id) if known.contains(&id) => {
                    selected.insert(id);
                }
                Ok(id) => warn!("Selection id {} not in question set, skipping", id),
                Err(_) => warn!("Invalid selection id: {}", part),
            }
        }
    }

    if selected.is_empty() {
        warn!("No valid ids selected, processing all questions");
        let mut all: Vec<u32> = ids.to_vec();
        all.sort_unstable();
        return all;
    }

    let mut result: Vec<u32> = selected.into_iter().collect();
    result.sort_unstable();
    result
}
