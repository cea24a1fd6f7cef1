use crate::questions::Question;
use crate::schema::{SchemaRegistry, UNKNOWN_SOURCE};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One parsed model reply. Exactly one of these exists per question after a
/// run, degraded or not. Field order matters: it fixes the CSV header and
/// JSON key order of every report artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationResult {
    pub question_id: u32,
    pub question: String,
    pub target_source: String,
    pub sql: String,
    pub assumptions: String,
    pub confidence: f64,
}

/// Extracts the four expected fields from raw model output.
///
/// This is a total function over raw strings: it never errors, whatever the
/// model sent back. Unusable input degrades to empty sql, the `"unknown"`
/// source and confidence 0.0, with the failure recorded in assumptions, so
/// one bad reply cannot abort the batch.
pub struct ResponseParser {
    known_sources: Vec<String>,
    number_re: Regex,
}

/// Raw field captures before normalization.
#[derive(Debug, Default)]
struct RawFields {
    target_source: Option<String>,
    sql: Option<String>,
    assumptions: Option<String>,
    confidence: Option<String>,
}

impl ResponseParser {
    pub fn new(registry: &SchemaRegistry) -> Self {
        Self {
            known_sources: registry.all_sources(),
            number_re: Regex::new(r"-?\d+(?:\.\d+)?").expect("static regex"),
        }
    }

    pub fn parse(&self, question: &Question, raw: &str) -> GenerationResult {
        let mut notes: Vec<String> = Vec::new();

        let fields = match self.extract_json_fields(raw) {
            Some(fields) => fields,
            None => {
                let fields = extract_labeled_fields(raw);
                if fields.target_source.is_none()
                    && fields.sql.is_none()
                    && fields.assumptions.is_none()
                    && fields.confidence.is_none()
                {
                    notes.push("Failed to parse model reply: no recognizable fields".to_string());
                }
                fields
            }
        };

        let target_source = match &fields.target_source {
            Some(raw_source) => self.normalize_source(raw_source),
            None => {
                notes.push("target_source missing from reply".to_string());
                UNKNOWN_SOURCE.to_string()
            }
        };

        let sql = fields.sql.unwrap_or_default();
        let assumptions = fields.assumptions.unwrap_or_default();

        let confidence = match &fields.confidence {
            Some(raw_conf) => match self.parse_confidence(raw_conf) {
                Some(value) => {
                    if !(0.0..=1.0).contains(&value) {
                        let clamped = value.clamp(0.0, 1.0);
                        notes.push(format!(
                            "confidence {} out of range, clamped to {}",
                            value, clamped
                        ));
                        clamped
                    } else {
                        value
                    }
                }
                None => {
                    notes.push(format!("confidence '{}' unparseable, defaulted to 0.0", raw_conf.trim()));
                    0.0
                }
            },
            None => {
                notes.push("confidence missing from reply, defaulted to 0.0".to_string());
                0.0
            }
        };

        let assumptions = if notes.is_empty() {
            assumptions
        } else if assumptions.is_empty() {
            format!("Parser note: {}", notes.join("; "))
        } else {
            format!("{} (Parser note: {})", assumptions, notes.join("; "))
        };

        GenerationResult {
            question_id: question.question_id,
            question: question.question.clone(),
            target_source,
            sql,
            assumptions,
            confidence,
        }
    }

    /// Degraded result for a question whose generation failed outright.
    pub fn degraded(&self, question: &Question, reason: &str) -> GenerationResult {
        GenerationResult {
            question_id: question.question_id,
            question: question.question.clone(),
            target_source: UNKNOWN_SOURCE.to_string(),
            sql: String::new(),
            assumptions: reason.to_string(),
            confidence: 0.0,
        }
    }

    fn normalize_source(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        self.known_sources
            .iter()
            .find(|s| s.eq_ignore_ascii_case(trimmed))
            .cloned()
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
    }

    fn parse_confidence(&self, raw: &str) -> Option<f64> {
        let trimmed = raw.trim();
        if let Ok(value) = trimmed.parse::<f64>() {
            return Some(value);
        }
        // Salvage the first numeric token from replies like "0.9 (high)"
        self.number_re
            .find(trimmed)
            .and_then(|m| m.as_str().parse::<f64>().ok())
    }

    /// Primary grammar: a JSON object, possibly wrapped in code fences or
    /// surrounding prose.
    fn extract_json_fields(&self, raw: &str) -> Option<RawFields> {
        let cleaned = raw.replace("```json", "").replace("```", "");
        let start = cleaned.find('{')?;
        let end = cleaned.rfind('}')?;
        if end <= start {
            return None;
        }
        let candidate = &cleaned[start..=end];

        let value: serde_json::Value = match serde_json::from_str(candidate) {
            Ok(v) => v,
            Err(_) => {
                // One repair pass for trailing commas before giving up
                let repaired = candidate.replace(",\n}", "\n}").replace(",}", "}");
                serde_json::from_str(&repaired).ok()?
            }
        };
        let obj = value.as_object()?;

        let get_text = |key: &str| -> Option<String> {
            obj.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .and_then(|(_, v)| match v {
                    serde_json::Value::String(s) => Some(s.clone()),
                    // A JSON null is an absent field, not the text "null"
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                })
        };

        Some(RawFields {
            target_source: get_text("target_source"),
            sql: get_text("sql"),
            assumptions: get_text("assumptions"),
            confidence: get_text("confidence"),
        })
    }
}

const LABELS: [&str; 4] = ["target_source", "sql", "assumptions", "confidence"];

/// Fallback grammar: one labeled line per field, case-insensitive labels,
/// with sql and assumptions allowed to continue across unlabeled lines.
fn extract_labeled_fields(raw: &str) -> RawFields {
    let mut fields = RawFields::default();
    let mut current: Option<&'static str> = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            current = None;
            continue;
        }

        if let Some((label, rest)) = match_label(trimmed) {
            let slot = field_slot(&mut fields, label);
            *slot = Some(rest.trim().to_string());
            // Only free-text fields may spill onto following lines
            current = match label {
                "sql" | "assumptions" => Some(label),
                _ => None,
            };
        } else if let Some(label) = current {
            if !trimmed.is_empty() {
                let slot = field_slot(&mut fields, label);
                let existing = slot.take().unwrap_or_default();
                *slot = Some(if existing.is_empty() {
                    trimmed.to_string()
                } else {
                    format!("{}\n{}", existing, trimmed)
                });
            }
        }
    }

    fields
}

fn match_label(line: &str) -> Option<(&'static str, &str)> {
    let stripped = line.trim_start_matches(['-', '*', ' ']).trim_start_matches('"');
    for label in LABELS {
        let Some(head) = stripped.get(..label.len()) else {
            continue;
        };
        if head.eq_ignore_ascii_case(label) {
            let after = stripped[label.len()..].trim_start_matches('"').trim_start();
            if let Some(rest) = after.strip_prefix(':') {
                return Some((label, rest));
            }
        }
    }
    None
}

fn field_slot<'a>(fields: &'a mut RawFields, label: &str) -> &'a mut Option<String> {
    match label {
        "target_source" => &mut fields.target_source,
        "sql" => &mut fields.sql,
        "assumptions" => &mut fields.assumptions,
        _ => &mut fields.confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Schema, SchemaRegistry};

    fn test_parser() -> ResponseParser {
        let registry = SchemaRegistry::from_schemas(vec![
            Schema {
                database: "sales_dw".to_string(),
                tables: vec![],
            },
            Schema {
                database: "marketing_dw".to_string(),
                tables: vec![],
            },
        ]);
        ResponseParser::new(&registry)
    }

    fn test_question() -> Question {
        Question {
            question_id: 1,
            question: "List all regions".to_string(),
        }
    }

    #[test]
    fn test_parse_labeled_reply() {
        let parser = test_parser();
        let raw = "target_source: sales_dw\nsql: SELECT DISTINCT region FROM sales;\nassumptions: none\nconfidence: 0.9";
        let result = parser.parse(&test_question(), raw);

        assert_eq!(result.question_id, 1);
        assert_eq!(result.target_source, "sales_dw");
        assert_eq!(result.sql, "SELECT DISTINCT region FROM sales;");
        assert_eq!(result.assumptions, "none");
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn test_parse_json_reply() {
        let parser = test_parser();
        let raw = r#"Here is the answer:
```json
{
  "target_source": "marketing_dw",
  "sql": "SELECT campaign_name FROM campaigns;",
  "assumptions": "campaigns table holds all campaigns",
  "confidence": 0.85
}
```"#;
        let result = parser.parse(&test_question(), raw);
        assert_eq!(result.target_source, "marketing_dw");
        assert_eq!(result.sql, "SELECT campaign_name FROM campaigns;");
        assert_eq!(result.confidence, 0.85);
    }

    #[test]
    fn test_parse_json_with_trailing_comma() {
        let parser = test_parser();
        let raw = r#"{"target_source": "sales_dw", "sql": "SELECT 1;", "assumptions": "x", "confidence": 0.5,}"#;
        let result = parser.parse(&test_question(), raw);
        assert_eq!(result.target_source, "sales_dw");
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn test_parse_json_null_fields_become_empty_not_literal_null() {
        let parser = test_parser();
        let raw = r#"{"target_source": "sales_dw", "sql": null, "assumptions": null, "confidence": 0.3}"#;
        let result = parser.parse(&test_question(), raw);
        assert_eq!(result.target_source, "sales_dw");
        assert_eq!(result.sql, "");
        assert!(!result.assumptions.contains("null"));
        assert_eq!(result.confidence, 0.3);
    }

    #[test]
    fn test_parse_json_null_confidence_defaults_with_note() {
        let parser = test_parser();
        let raw = r#"{"target_source": "sales_dw", "sql": "SELECT 1;", "assumptions": "x", "confidence": null}"#;
        let result = parser.parse(&test_question(), raw);
        assert_eq!(result.confidence, 0.0);
        assert!(result.assumptions.contains("confidence missing"));
    }

    #[test]
    fn test_parse_case_insensitive_labels_and_source() {
        let parser = test_parser();
        let raw = "Target_Source: SALES_DW\nSQL: SELECT 1;\nAssumptions: none\nConfidence: 0.7";
        let result = parser.parse(&test_question(), raw);
        assert_eq!(result.target_source, "sales_dw");
        assert_eq!(result.sql, "SELECT 1;");
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn test_parse_unknown_source_maps_to_sentinel() {
        let parser = test_parser();
        let raw = "target_source: finance_dw\nsql: SELECT 1;\nassumptions: x\nconfidence: 0.4";
        let result = parser.parse(&test_question(), raw);
        assert_eq!(result.target_source, UNKNOWN_SOURCE);
        // The other fields are still extracted
        assert_eq!(result.sql, "SELECT 1;");
    }

    #[test]
    fn test_parse_missing_confidence_defaults_with_note() {
        let parser = test_parser();
        let raw = "target_source: sales_dw\nsql: SELECT 1;\nassumptions: checked sales tables";
        let result = parser.parse(&test_question(), raw);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.target_source, "sales_dw");
        assert_eq!(result.sql, "SELECT 1;");
        assert!(result.assumptions.contains("confidence missing"));
        assert!(result.assumptions.contains("checked sales tables"));
    }

    #[test]
    fn test_parse_out_of_range_confidence_is_clamped_with_note() {
        let parser = test_parser();
        let raw = "target_source: sales_dw\nsql: SELECT 1;\nassumptions: x\nconfidence: 1.7";
        let result = parser.parse(&test_question(), raw);
        assert_eq!(result.confidence, 1.0);
        assert!(result.assumptions.contains("clamped"));

        let raw = "target_source: sales_dw\nsql: SELECT 1;\nassumptions: x\nconfidence: -0.3";
        let result = parser.parse(&test_question(), raw);
        assert_eq!(result.confidence, 0.0);
        assert!(result.assumptions.contains("clamped"));
    }

    #[test]
    fn test_parse_unparseable_confidence_defaults_with_note() {
        let parser = test_parser();
        let raw = "target_source: sales_dw\nsql: SELECT 1;\nassumptions: x\nconfidence: very high";
        let result = parser.parse(&test_question(), raw);
        assert_eq!(result.confidence, 0.0);
        assert!(result.assumptions.contains("unparseable"));
    }

    #[test]
    fn test_parse_confidence_salvages_numeric_token() {
        let parser = test_parser();
        let raw = "target_source: sales_dw\nsql: SELECT 1;\nassumptions: x\nconfidence: 0.8 (high)";
        let result = parser.parse(&test_question(), raw);
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn test_parse_multiline_sql() {
        let parser = test_parser();
        let raw = "target_source: sales_dw\nsql: SELECT region,\nSUM(revenue)\nFROM sales\nGROUP BY region;\nassumptions: none\nconfidence: 0.9";
        let result = parser.parse(&test_question(), raw);
        assert_eq!(
            result.sql,
            "SELECT region,\nSUM(revenue)\nFROM sales\nGROUP BY region;"
        );
    }

    #[test]
    fn test_parse_garbage_degrades_never_errors() {
        let parser = test_parser();
        for raw in ["", "complete nonsense", "{broken json", "🤖🤖🤖", "{}"] {
            let result = parser.parse(&test_question(), raw);
            assert_eq!(result.sql, "");
            assert_eq!(result.target_source, UNKNOWN_SOURCE);
            assert_eq!(result.confidence, 0.0);
            assert!(!result.assumptions.is_empty(), "no note for input {:?}", raw);
        }
    }

    #[test]
    fn test_parse_confidence_always_in_range() {
        let parser = test_parser();
        let inputs = [
            "confidence: 42",
            "confidence: -5",
            "confidence: 0.5",
            "confidence: NaN-ish",
            "no fields at all",
        ];
        for raw in inputs {
            let result = parser.parse(&test_question(), raw);
            assert!(
                (0.0..=1.0).contains(&result.confidence),
                "confidence {} out of range for {:?}",
                result.confidence,
                raw
            );
        }
    }

    #[test]
    fn test_degraded_result_shape() {
        let parser = test_parser();
        let result = parser.degraded(&test_question(), "System error after 3 retries: timeout");
        assert_eq!(result.question_id, 1);
        assert_eq!(result.target_source, UNKNOWN_SOURCE);
        assert_eq!(result.sql, "");
        assert_eq!(result.confidence, 0.0);
        assert!(result.assumptions.contains("3 retries"));
    }
}
