use std::time::Duration;

pub mod error;
pub mod predicate;
pub mod schema;
pub mod value;

///
/// Render an elapsed duration for log output.
///
/// Truncated to millisecond precision - the micro and nano components humantime
/// would otherwise print are noise at reconciliation timescales.
///
pub fn elapsed_display(elapsed: Duration) -> String {
    humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64)).to_string()
}

///
/// Average processing time per record, for throughput log lines.
///
pub fn row_rate(rows: usize, elapsed: Duration) -> String {
    format!("{:.3}ms/row", elapsed.as_millis() as f64 / rows.max(1) as f64)
}

///
/// Tint a log fragment (typically a duration) so it stands out in terminal output.
///
pub fn highlight(msg: &str) -> ansi_term::ANSIGenericString<'_, str> {
    ansi_term::Colour::Cyan.paint(msg)
}
