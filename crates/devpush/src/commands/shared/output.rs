//! Stdout helpers. Logs go to stderr, so stdout carries only results.

use anyhow::Result;
use serde::Serialize;
use std::io::Write;

/// Write `value` as pretty JSON followed by a newline
pub fn write_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", rendered)?;
    stdout.flush()?;
    Ok(())
}

/// Write each value as a YAML document separated by `---`
pub fn write_yaml_documents<T: Serialize>(values: &[T]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            writeln!(stdout, "---")?;
        }
        write!(stdout, "{}", serde_yaml::to_string(value)?)?;
    }
    stdout.flush()?;
    Ok(())
}
