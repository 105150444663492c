use std::io::Write;
use std::path::Path;

use anyhow::{Context, bail};
use jsoniq_engine::QueryResult;

use crate::OutputFormat;

/// Serialize the result items. Function items cannot be serialized and fail.
pub fn render(result: &QueryResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Lines => {
            let mut out = String::new();
            for item in &result.items {
                out.push_str(&item.to_json_string()?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => {
            let values = result.items.iter().map(|item| item.to_json()).collect::<Result<Vec<_>, _>>()?;
            let mut out = serde_json::to_string_pretty(&serde_json::Value::Array(values))?;
            out.push('\n');
            Ok(out)
        }
    }
}

/// Write to `path`, or stdout without one. An existing file is only
/// replaced when `overwrite` is set.
pub fn write_output(rendered: &str, path: Option<&Path>, overwrite: bool) -> anyhow::Result<()> {
    let Some(path) = path else {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(rendered.as_bytes())?;
        return Ok(stdout.flush()?);
    };
    if path.exists() && !overwrite {
        bail!("output path {} already exists; pass --overwrite to replace it", path.display());
    }
    std::fs::write(path, rendered).with_context(|| format!("cannot write {}", path.display()))?;
    tracing::debug!(path = %path.display(), "wrote query output");
    Ok(())
}
