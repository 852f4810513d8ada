//! Per-plugin diagnostic output.

use std::fmt;
use std::sync::Arc;

use tracing::info;

/// Width of the left-aligned plugin-name column in default log lines.
pub const NAME_COLUMN_WIDTH: usize = 12;

/// Injectable log output of one plugin instance.
///
/// Each instance owns its sink; there is no module-level logger. The default
/// sink ([`LogSink::for_plugin`]) prefixes the plugin name and forwards the
/// line to `tracing`.
#[derive(Clone)]
pub struct LogSink(Arc<dyn Fn(&str) + Send + Sync>);

impl LogSink {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self(Arc::new(sink))
    }

    /// Default sink: `"<name padded to 12> <message>"` at `info` level.
    pub fn for_plugin(name: &str) -> Self {
        let name = name.to_string();
        Self::new(move |message| {
            let line = format_line(&name, message);
            info!(target: "avhub::plugin", plugin = %name, "{line}");
        })
    }

    /// A sink that drops every line.
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn log(&self, message: &str) {
        (self.0)(message)
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogSink(..)")
    }
}

/// Render one default-format line.
pub fn format_line(name: &str, message: &str) -> String {
    format!("{name:<width$} {message}", width = NAME_COLUMN_WIDTH)
}
