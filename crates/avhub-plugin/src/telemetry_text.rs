//! Simple text telemetry: one decimal sample per line, `"<value>,\n"`.

use avhub_types::HubError;

/// Render one sample with four decimals, e.g. `0.05` → `"0.0500,\n"`.
pub fn format_sample(value: f64) -> String {
    format!("{value:.4},\n")
}

/// Parse every sample in `text`.
///
/// Blank lines are skipped; the trailing comma is optional.
///
/// # Errors
///
/// Returns [`HubError::Parsing`] naming the first line that is not a finite
/// number.
pub fn parse_samples(text: &str) -> Result<Vec<f64>, HubError> {
    text.lines()
        .map(str::trim)
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(i, line)| {
            let field = line.strip_suffix(',').unwrap_or(line).trim();
            field
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| HubError::Parsing(format!("line {}: '{line}' is not a sample", i + 1)))
        })
        .collect()
}
