//! JSON Lines example files.

use std::fs;
use std::path::Path;

use anyhow::Context;
use ontolabel_core::Example;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct Record {
    #[serde(default)]
    id: Option<String>,
    text: String,
    #[serde(default)]
    labels: Vec<String>,
}

/// Read `{"id"?, "text", "labels"}` records, one per line. Blank lines are
/// skipped; a missing id becomes the record's zero-based position.
pub fn load_examples(path: &Path) -> anyhow::Result<Vec<Example>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_examples(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn parse_examples(raw: &str) -> anyhow::Result<Vec<Example>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .enumerate()
        .map(|(position, (line_no, line))| -> anyhow::Result<Example> {
            let record: Record = serde_json::from_str(line)
                .with_context(|| format!("line {}", line_no + 1))?;
            let id = record.id.unwrap_or_else(|| position.to_string());
            Ok(Example::new(id, record.text, record.labels))
        })
        .collect()
}

#[derive(Serialize)]
struct PredictionRecord<'a> {
    id: &'a str,
    labels: &'a [String],
}

/// Write one `{"id", "labels"}` line per predicted example.
pub fn write_predictions(
    path: &Path,
    predictions: &[(&Example, &[String])],
) -> anyhow::Result<()> {
    let mut out = String::new();
    for &(example, labels) in predictions {
        let record = PredictionRecord {
            id: &example.id,
            labels,
        };
        out.push_str(&serde_json::to_string(&record)?);
        out.push('\n');
    }
    fs::write(path, out).with_context(|| format!("writing {}", path.display()))
}
