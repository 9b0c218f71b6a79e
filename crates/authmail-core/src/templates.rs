//! Per-event body overrides.
//!
//! A template directory holds `<event>.txt` and `<event>.html` files using
//! `{{ Key }}` placeholders (a leading dot, `{{ .Key }}`, is accepted too).
//! Values inserted into `.html` templates are HTML-escaped.

use crate::error::TemplateError;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Values available to templates, keyed by placeholder name.
pub type TemplateContext = serde_json::Map<String, Value>;

/// Body variant of an event template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Plain text body.
    Text,
    /// HTML alternative.
    Html,
}

impl Variant {
    /// File extension of the variant.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Html => "html",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Key(String),
}

/// A parsed template.
#[derive(Debug, Clone)]
struct Template {
    segments: Vec<Segment>,
    html: bool,
}

impl Template {
    fn parse(name: &str, source: &str) -> Result<Self, TemplateError> {
        let parse_error = |reason: String| TemplateError::Parse {
            name: name.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after
                .find("}}")
                .ok_or_else(|| parse_error("unclosed {{".to_string()))?;

            let key = after[..close].trim();
            let key = key.strip_prefix('.').unwrap_or(key);
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(parse_error(format!("invalid placeholder {{{{{key}}}}}")));
            }
            segments.push(Segment::Key(key.to_string()));

            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            segments,
            html: Path::new(name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(Variant::Html.extension())),
        })
    }

    fn render(&self, name: &str, context: &TemplateContext) -> Result<String, TemplateError> {
        let mut out = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Key(key) => {
                    let value = context.get(key).ok_or_else(|| TemplateError::Render {
                        name: name.to_string(),
                        reason: format!("no value for {key}"),
                    })?;
                    let raw = match value {
                        Value::String(s) => s.clone(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    if self.html {
                        out.push_str(&escape_html(&raw));
                    } else {
                        out.push_str(&raw);
                    }
                }
            }
        }

        Ok(out)
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Templates loaded once at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TemplateTable {
    templates: HashMap<String, Template>,
}

impl TemplateTable {
    /// Creates an empty table; every lookup falls back.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads every `.txt` and `.html` file in `dir`.
    ///
    /// A directory that does not exist disables templating.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or a template cannot be read, or
    /// a template is malformed.
    pub fn load(dir: &Path) -> Result<Self, TemplateError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TemplateError::Io { path, source }
        };

        if !dir.exists() {
            tracing::info!(path = %dir.display(), "Template directory not found, using built-in messages");
            return Ok(Self::empty());
        }

        let mut sources = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_error(dir))? {
            let path = entry.map_err(io_error(dir))?.path();
            let is_template = path.is_file()
                && path.extension().is_some_and(|ext| {
                    ext.eq_ignore_ascii_case(Variant::Text.extension())
                        || ext.eq_ignore_ascii_case(Variant::Html.extension())
                });
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !is_template {
                continue;
            }

            let source = std::fs::read_to_string(&path).map_err(io_error(&path))?;
            sources.push((name.to_string(), source));
        }

        let table = Self::from_sources(sources)?;
        tracing::info!(count = table.len(), path = %dir.display(), "Loaded email templates");
        Ok(table)
    }

    /// Builds a table from `(file name, source)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if a template is malformed.
    pub fn from_sources<I, N, S>(sources: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: AsRef<str>,
    {
        let mut templates = HashMap::new();
        for (name, source) in sources {
            let name = name.into();
            let template = Template::parse(&name, source.as_ref())?;
            templates.insert(name, template);
        }
        Ok(Self { templates })
    }

    /// Number of loaded templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true if no templates are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Renders `event.variant` against `context`.
    ///
    /// Returns `Ok(None)` when no such template exists, so the caller can
    /// use its built-in text.
    ///
    /// # Errors
    ///
    /// Returns an error if the template references a value that is not in
    /// `context`.
    pub fn render(
        &self,
        event: &str,
        variant: Variant,
        context: &TemplateContext,
    ) -> Result<Option<String>, TemplateError> {
        let name = format!("{event}.{}", variant.extension());
        self.templates
            .get(&name)
            .map(|template| template.render(&name, context))
            .transpose()
    }
}
