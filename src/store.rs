use crate::parser::GenerationResult;

/// Append-only collection of generation results.
///
/// Reads are ordered by question_id regardless of append order, so a
/// bounded-worker execution of the batch would not change report output.
/// No deduplication: duplicate ids are retained and both are visible.
#[derive(Default)]
pub struct ResultStore {
    results: Vec<GenerationResult>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, result: GenerationResult) {
        self.results.push(result);
    }

    /// All results, sorted by question_id ascending.
    pub fn all(&self) -> Vec<GenerationResult> {
        let mut sorted = self.results.clone();
        sorted.sort_by_key(|r| r.question_id);
        sorted
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
