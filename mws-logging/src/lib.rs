use std::{
    collections::HashMap,
    env,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{field::Visit, span, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::MakeWriter,
    layer::{Context, Layer},
    prelude::*,
    registry, EnvFilter,
};

// --- Custom "Tee" Writer ---
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A, B> Write for Tee<A, B>
where
    A: Write,
    B: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B, W1, W2> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a, Writer = W1>,
    B: MakeWriter<'a, Writer = W2>,
    W1: Write + 'a,
    W2: Write + 'a,
{
    type Writer = Tee<W1, W2>;
    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

// --- Tag-Based Filtering Logic ---

/// A `key:value` span-field filter. A value of `*` matches any value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

struct TagFilterLayer {
    filters: Vec<Tag>,
}

impl<S> Layer<S> for TagFilterLayer
where
    S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = HashMap::new();
        let mut visitor = FieldVisitor(&mut fields);
        attrs.record(&mut visitor);
        span.extensions_mut().insert(fields);
    }

    fn enabled(&self, _meta: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        if self.filters.is_empty() {
            return true;
        }

        let scope = match ctx.current_span().id().and_then(|id| ctx.span_scope(id)) {
            Some(scope) => scope,
            None => return false, // If tags are specified, events outside a span are filtered.
        };

        let mut all_fields = HashMap::new();
        for span_ref in scope {
            if let Some(fields) = span_ref.extensions().get::<HashMap<String, String>>() {
                for (k, v) in fields {
                    all_fields.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }

        self.filters.iter().all(|filter| {
            all_fields
                .get(&filter.key)
                .is_some_and(|value| filter.value == "*" || value.contains(&filter.value))
        })
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{value:?}"));
    }
}

/// Parse `MWS_LOG_TAGS` syntax: `instance:2026-01-01,op:*`.
///
/// Entries without a colon are ignored.
pub fn parse_tags(raw: &str) -> Vec<Tag> {
    raw.split(',')
        .filter_map(|s| {
            let mut parts = s.splitn(2, ':');
            let key = parts.next()?.trim().to_string();
            let value = parts.next()?.trim().to_string();
            if key.is_empty() {
                return None;
            }
            Some(Tag { key, value })
        })
        .collect()
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub use_console: bool,
    pub use_file: bool,
    pub json: bool,
    pub tags: Vec<Tag>,
    pub file_path: PathBuf,
}

impl LogSettings {
    /// Read `MWS_LOG_LEVEL`, `MWS_LOG_OUTPUT`, `MWS_LOG_FORMAT`, `MWS_LOG_TAGS`
    /// and `MWS_LOG_FILE_PATH`.
    pub fn from_env() -> Self {
        let level = env::var("MWS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let output = env::var("MWS_LOG_OUTPUT").unwrap_or_else(|_| "console".to_string());
        let format = env::var("MWS_LOG_FORMAT").unwrap_or_else(|_| "human".to_string());
        let tags = env::var("MWS_LOG_TAGS").unwrap_or_default();
        let file_path =
            env::var("MWS_LOG_FILE_PATH").unwrap_or_else(|_| "/tmp/mws.log".to_string());

        Self {
            level,
            use_console: output == "console" || output == "both",
            use_file: output == "file" || output == "both",
            json: format == "json",
            tags: parse_tags(&tags),
            file_path: PathBuf::from(file_path),
        }
    }
}

/// Initializes the global tracing subscriber based on environment variables.
///
/// Returns the appender guard when file output is enabled; keep it alive for
/// the lifetime of the process so buffered lines are flushed.
pub fn init_subscriber() -> Option<WorkerGuard> {
    let settings = LogSettings::from_env();

    let mut env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    if let Ok(directive) = "tokio=warn".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    let tag_filter_layer = TagFilterLayer {
        filters: settings.tags.clone(),
    };

    let mut guard: Option<WorkerGuard> = None;

    let subscriber = registry().with(env_filter).with(tag_filter_layer);

    let log_dir = settings
        .file_path
        .parent()
        .unwrap_or_else(|| Path::new("/tmp"));
    let log_filename = settings
        .file_path
        .file_name()
        .unwrap_or("mws.log".as_ref());

    // try_init: a host process may already have installed a subscriber
    if settings.use_console && settings.use_file {
        let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        let tee_writer = MakeTee {
            make_a: std::io::stderr,
            make_b: non_blocking,
        };

        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(tee_writer);
        if settings.json {
            let _ = subscriber.with(fmt_layer.json()).try_init();
        } else {
            let _ = subscriber.with(fmt_layer).try_init();
        }
    } else if settings.use_console {
        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        if settings.json {
            let _ = subscriber.with(fmt_layer.json()).try_init();
        } else {
            let _ = subscriber.with(fmt_layer).try_init();
        }
    } else if settings.use_file {
        let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
        if settings.json {
            let _ = subscriber.with(fmt_layer.json()).try_init();
        } else {
            let _ = subscriber.with(fmt_layer).try_init();
        }
    } else {
        let _ = subscriber.try_init();
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags("instance:2026-01-01, op : * ,garbage,:nokey");
        assert_eq!(
            tags,
            vec![
                Tag {
                    key: "instance".into(),
                    value: "2026-01-01".into()
                },
                Tag {
                    key: "op".into(),
                    value: "*".into()
                },
            ]
        );
        assert!(parse_tags("").is_empty());
    }

    #[test]
    #[serial]
    fn test_settings_defaults() {
        for var in [
            "MWS_LOG_LEVEL",
            "MWS_LOG_OUTPUT",
            "MWS_LOG_FORMAT",
            "MWS_LOG_TAGS",
            "MWS_LOG_FILE_PATH",
        ] {
            env::remove_var(var);
        }

        let settings = LogSettings::from_env();
        assert_eq!(settings.level, "info");
        assert!(settings.use_console);
        assert!(!settings.use_file);
        assert!(!settings.json);
        assert!(settings.tags.is_empty());
        assert_eq!(settings.file_path, PathBuf::from("/tmp/mws.log"));
    }

    #[test]
    #[serial]
    fn test_settings_from_env() {
        env::set_var("MWS_LOG_OUTPUT", "both");
        env::set_var("MWS_LOG_FORMAT", "json");
        env::set_var("MWS_LOG_TAGS", "instance:*");

        let settings = LogSettings::from_env();
        assert!(settings.use_console);
        assert!(settings.use_file);
        assert!(settings.json);
        assert_eq!(settings.tags.len(), 1);

        env::remove_var("MWS_LOG_OUTPUT");
        env::remove_var("MWS_LOG_FORMAT");
        env::remove_var("MWS_LOG_TAGS");
    }
}
