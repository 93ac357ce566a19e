use crate::record::LogRecord;
use std::fmt::Write;

/// Render a record as one remote log entry.
///
/// Layout: `{millis:03} | {LEVL} {logger} ({thread}): {message}`. The full
/// timestamp travels alongside the entry, so only the millisecond part is
/// printed. A trace is appended on the following lines of the same entry.
pub fn format_record(record: &LogRecord) -> String {
    let level = record.level.as_str();
    let mut out = String::with_capacity(64 + record.message.as_ref().map_or(0, String::len));

    let _ = write!(
        out,
        "{:03} | {} {} ({}): {}",
        record.timestamp_ms.rem_euclid(1000),
        &level[..level.len().min(4)],
        short_logger(&record.logger),
        record.thread,
        record.message.as_deref().unwrap_or_default(),
    );

    if let Some(trace) = &record.trace {
        out.push('\n');
        out.push_str(&trace.join("\n"));
    }
    out
}

/// Last segment of a `::` or `.` separated logger path.
fn short_logger(logger: &str) -> &str {
    let start = logger
        .rfind("::")
        .map(|i| i + 2)
        .or_else(|| logger.rfind('.').map(|i| i + 1))
        .unwrap_or(0);
    &logger[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;

    #[test]
    fn renders_single_line_entry() {
        let record = LogRecord::new(1_700_000_000_042, Level::Info, "my_app::db::pool", "tokio-1", "connected");
        assert_eq!(format_record(&record), "042 | INFO pool (tokio-1): connected");
    }

    #[test]
    fn level_is_cut_to_four_chars() {
        let record = LogRecord::new(5, Level::Error, "svc", "main", "failed");
        assert_eq!(format_record(&record), "005 | ERRO svc (main): failed");
    }

    #[test]
    fn dotted_logger_names_are_shortened() {
        assert_eq!(short_logger("com.example.Service"), "Service");
        assert_eq!(short_logger("plain"), "plain");
    }

    #[test]
    fn trace_lines_stay_in_one_entry() {
        let record = LogRecord::new(999, Level::Error, "svc", "main", "")
            .with_trace(vec!["io error".into(), "Caused by: refused".into()]);
        let rendered = format_record(&record);
        assert_eq!(rendered, "999 | ERRO svc (main): \nio error\nCaused by: refused");
        assert_eq!(rendered.lines().count(), 3);
    }
}
