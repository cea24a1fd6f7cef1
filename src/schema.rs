use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sentinel target source used when the model cannot classify a question
/// against any registered warehouse.
pub const UNKNOWN_SOURCE: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ctype: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub relationships: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub database: String,
    pub tables: Vec<Table>,
}

/// Registry of the warehouse schemas SQL can be generated against.
///
/// Loaded once at startup and never mutated. Sources keep the order they
/// were registered in, so prompt text is deterministic run to run.
pub struct SchemaRegistry {
    schemas: Vec<Schema>,
}

impl SchemaRegistry {
    /// Load the two warehouse schemas from `<dir>/sales_dw.json` and
    /// `<dir>/marketing_dw.json`. Fails fast before any question is
    /// processed if either document is missing or malformed.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let sales = Self::load_schema(dir.join("sales_dw.json"))?;
        let marketing = Self::load_schema(dir.join("marketing_dw.json"))?;
        Ok(Self {
            schemas: vec![sales, marketing],
        })
    }

    /// Build a registry directly from already-parsed schemas.
    pub fn from_schemas(schemas: Vec<Schema>) -> Self {
        Self { schemas }
    }

    fn load_schema(path: PathBuf) -> Result<Schema> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            PipelineError::MalformedInput(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            PipelineError::MalformedInput(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Source identifiers in registration order.
    pub fn all_sources(&self) -> Vec<String> {
        self.schemas.iter().map(|s| s.database.clone()).collect()
    }

    /// Render one source's tables and columns as a prompt-ready block.
    ///
    /// Output is a pure function of the loaded schema: same input, same
    /// text, byte for byte.
    pub fn describe(&self, source_id: &str) -> Result<String> {
        let schema = self
            .schemas
            .iter()
            .find(|s| s.database == source_id)
            .ok_or_else(|| PipelineError::UnknownSource(source_id.to_string()))?;

        let mut text = format!("Database: {}\n\n", schema.database);
        for table in &schema.tables {
            text.push_str(&format!("Table: {}\nColumns:\n", table.name));
            for col in &table.columns {
                text.push_str(&format!(
                    "  - {}: {} — {}\n",
                    col.name, col.ctype, col.description
                ));
            }
            if !table.relationships.is_empty() {
                text.push_str("Relationships:\n");
                for rel in &table.relationships {
                    text.push_str(&format!("  - {}\n", rel));
                }
            }
            text.push('\n');
        }
        Ok(text)
    }
}
