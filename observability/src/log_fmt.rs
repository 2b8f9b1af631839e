//! Terminal log format.
//!
//! Every line has a fixed-width block column, filled from the `block` or
//! `height` field of the event, so that ingestion progress reads as a table:
//!
//! ```text
//! INFO  12:30:01.120 pipeline   42/0x00000029…     ingested block  transactions=3 logs=7
//! WARN  12:30:02.004 pipeline                      request failed, retrying  what="fetch block"
//!     failed to send elasticsearch request
//!     ├╴at index/src/elasticsearch.rs:155:14
//! ```
//!
//! The `err` and `error` fields hold error reports that span several lines.
//! They are printed last, indented below the event.
use std::fmt::{self, Write as _};

use nu_ansi_term::{Color, Style};
use time::format_description::OwnedFormatItem;
use tracing::{field, Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
};

const TARGET_WIDTH: usize = 10;
const CURSOR_WIDTH: usize = 18;
/// Hash characters kept in the block column, `0x` included.
const CURSOR_HASH_LEN: usize = 10;
const ERROR_INDENT: &str = "    ";

pub struct IndexerFormat {
    time_format: OwnedFormatItem,
}

/// Fields of one event, split by where they are rendered.
#[derive(Debug, Default, PartialEq)]
struct EventFields {
    message: Option<String>,
    cursor: Option<String>,
    errors: Vec<String>,
    rest: Vec<(&'static str, String)>,
}

impl<S, N> FormatEvent<S, N> for IndexerFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let ansi = writer.has_ansi_escapes();

        let mut fields = EventFields::default();
        event.record(&mut fields);

        write_level(&mut writer, meta.level(), ansi)?;

        let time = self.now();
        let target = format!("{:<TARGET_WIDTH$}", short_target(meta.target()));
        let cursor = format!(
            "{:<CURSOR_WIDTH$}",
            fields.cursor.as_deref().map(short_cursor).unwrap_or_default()
        );
        if ansi {
            let dimmed = Style::new().dimmed();
            write!(writer, " {} {} ", dimmed.paint(time), dimmed.paint(target))?;
            write!(writer, "{}", Color::Cyan.paint(cursor))?;
        } else {
            write!(writer, " {time} {target} {cursor}")?;
        }

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, " {}:", span.name())?;
            }
        }

        if let Some(message) = &fields.message {
            write!(writer, " {message}")?;
        }

        for (name, value) in &fields.rest {
            if ansi {
                write!(writer, "  {}={value}", Style::new().italic().paint(*name))?;
            } else {
                write!(writer, "  {name}={value}")?;
            }
        }

        writeln!(writer)?;

        for error in &fields.errors {
            for line in error.lines() {
                if ansi {
                    writeln!(writer, "{ERROR_INDENT}{}", Color::Red.paint(line))?;
                } else {
                    writeln!(writer, "{ERROR_INDENT}{line}")?;
                }
            }
        }

        Ok(())
    }
}

impl IndexerFormat {
    fn now(&self) -> String {
        time::OffsetDateTime::now_utc()
            .format(&self.time_format)
            .unwrap_or_else(|_| "--:--:--.---".to_string())
    }
}

impl Default for IndexerFormat {
    fn default() -> Self {
        let time_format =
            time::format_description::parse_owned::<2>("[hour]:[minute]:[second].[subsecond digits:3]")
                .unwrap_or_else(|_| OwnedFormatItem::Compound(Box::new([])));

        Self { time_format }
    }
}

impl EventFields {
    fn record(&mut self, name: &'static str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "block" | "height" if self.cursor.is_none() => self.cursor = Some(value),
            "err" | "error" => self.errors.push(value),
            _ => self.rest.push((name, value)),
        }
    }
}

impl field::Visit for EventFields {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        self.record(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        self.record(field.name(), format!("{value:?}"));
    }
}

fn write_level(writer: &mut Writer<'_>, level: &Level, ansi: bool) -> fmt::Result {
    let (label, color) = match *level {
        Level::TRACE => ("TRACE", Color::Purple),
        Level::DEBUG => ("DEBUG", Color::Blue),
        Level::INFO => ("INFO", Color::Green),
        Level::WARN => ("WARN", Color::Yellow),
        Level::ERROR => ("ERROR", Color::Red),
    };

    let label = format!("{label:<5}");
    if ansi {
        write!(writer, "{}", color.bold().paint(label))
    } else {
        writer.write_str(&label)
    }
}

/// Keep only the crate-level module of the event target.
fn short_target(target: &str) -> &str {
    let mut parts = target.split("::");
    let first = parts.next().unwrap_or(target);
    parts.next().unwrap_or(first)
}

/// Shortens the hash of a `height/hash` cursor. Other values are returned as is.
fn short_cursor(cursor: &str) -> String {
    let Some((height, hash)) = cursor.split_once('/') else {
        return cursor.to_string();
    };

    if hash.chars().count() <= CURSOR_HASH_LEN {
        return cursor.to_string();
    }

    let mut short = String::with_capacity(height.len() + CURSOR_HASH_LEN + 4);
    let _ = write!(short, "{height}/");
    short.extend(hash.chars().take(CURSOR_HASH_LEN));
    short.push('…');
    short
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use tracing_subscriber::fmt::MakeWriter;

    use super::{short_cursor, short_target, EventFields, IndexerFormat};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Buffer {
        type Writer = Buffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let buffer = Buffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .event_format(IndexerFormat::default())
            .with_writer(buffer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, f);

        let output = buffer.0.lock().unwrap().clone();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_short_target() {
        assert_eq!(short_target("ethevents_ingestion::pipeline"), "pipeline");
        assert_eq!(short_target("ethevents_index"), "ethevents_index");
        assert_eq!(short_target("a::b::c"), "b");
    }

    #[test]
    fn test_short_cursor() {
        assert_eq!(short_cursor("42/0x00000029"), "42/0x00000029");
        assert_eq!(short_cursor("42/0x9f1c2e5d7a8b"), "42/0x9f1c2e5d…");
        assert_eq!(short_cursor("42"), "42");
    }

    #[test]
    fn test_fields_are_split_by_role() {
        let mut fields = EventFields::default();
        fields.record("height", "7".to_string());
        fields.record("block", "8/0xb8".to_string());
        fields.record("err", "boom".to_string());
        fields.record("message", "ingested block".to_string());
        fields.record("logs", "2".to_string());

        assert_eq!(
            fields,
            EventFields {
                message: Some("ingested block".to_string()),
                cursor: Some("7".to_string()),
                errors: vec!["boom".to_string()],
                rest: vec![("block", "8/0xb8".to_string()), ("logs", "2".to_string())],
            }
        );
    }

    #[test]
    fn test_event_line() {
        let output = capture(|| {
            tracing::info!(block = "42/0x9f1c2e5d7a8b", transactions = 3, "ingested block");
        });

        assert!(output.starts_with("INFO  "));
        assert!(output.contains(" log_fmt    42/0x9f1c2e5d…"));
        assert!(output.contains(" ingested block  transactions=3\n"));
        assert_eq!(output.lines().count(), 1);
    }

    #[test]
    fn test_error_report_below_event() {
        let output = capture(|| {
            tracing::warn!(err = "request failed\nat backend.rs:1", "retrying");
        });

        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("WARN  "));
        assert!(lines[0].ends_with(" retrying"));
        assert_eq!(lines[1], "    request failed");
        assert_eq!(lines[2], "    at backend.rs:1");
    }
}
