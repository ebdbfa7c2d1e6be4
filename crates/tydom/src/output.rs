//! Output formatting for gateway data.
//!
//! A [`Printer`] is built once from the global flags and carries the
//! chosen `--output` format, color decision, and quiet flag. Commands hand
//! it serde data plus a table view; structured formats always serialize
//! the data itself, never the table view.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, GlobalOpts, OutputFormat};

fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

// ── Printer ──────────────────────────────────────────────────────────

pub struct Printer {
    format: OutputFormat,
    color: bool,
    quiet: bool,
}

impl Printer {
    pub fn new(global: &GlobalOpts) -> Self {
        Self {
            format: global.output.clone(),
            color: should_color(&global.color),
            quiet: global.quiet,
        }
    }

    pub fn label(&self, text: &str) -> String {
        if self.color {
            text.dimmed().to_string()
        } else {
            text.to_owned()
        }
    }

    pub fn accent(&self, text: &str) -> String {
        if self.color {
            text.cyan().to_string()
        } else {
            text.to_owned()
        }
    }

    /// Aligned `key value` lines for detail views.
    pub fn fields(&self, fields: &[(&str, String)]) -> String {
        let width = fields.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        fields
            .iter()
            .map(|(key, value)| format!("{} {value}", self.label(&format!("{key:<width$}"))))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Endpoints, scenarios and the like: a table, or one id per line.
    pub fn list<T, R>(&self, data: &[T], to_row: impl Fn(&T) -> R, id_fn: impl Fn(&T) -> String) -> String
    where
        T: Serialize,
        R: Tabled,
    {
        match self.format {
            OutputFormat::Table => {
                let rows: Vec<R> = data.iter().map(to_row).collect();
                Table::new(rows).with(Style::rounded()).to_string()
            }
            OutputFormat::Plain => data.iter().map(id_fn).collect::<Vec<_>>().join("\n"),
            _ => structured(&self.format, data),
        }
    }

    /// One item: a detail view, or its id.
    pub fn single<T: Serialize>(
        &self,
        data: &T,
        detail_fn: impl Fn(&T) -> String,
        id_fn: impl Fn(&T) -> String,
    ) -> String {
        match self.format {
            OutputFormat::Table => detail_fn(data),
            OutputFormat::Plain => id_fn(data),
            _ => structured(&self.format, data),
        }
    }

    /// One item of a live stream. JSON formats emit NDJSON and YAML emits
    /// one document per item, so the output can be piped line by line.
    pub fn event<T: Serialize>(&self, data: &T, line: impl FnOnce() -> String) -> String {
        match self.format {
            OutputFormat::Table | OutputFormat::Plain => line(),
            OutputFormat::Json | OutputFormat::JsonCompact => compact_json(data),
            OutputFormat::Yaml => format!("---\n{}", yaml(data)),
        }
    }

    pub fn print(&self, rendered: &str) {
        if self.quiet || rendered.is_empty() {
            return;
        }
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{rendered}");
    }
}

// ── Serializers ──────────────────────────────────────────────────────

fn structured<T: Serialize + ?Sized>(format: &OutputFormat, data: &T) -> String {
    match format {
        OutputFormat::JsonCompact => compact_json(data),
        OutputFormat::Yaml => yaml(data),
        _ => pretty_json(data),
    }
}

fn serialization_failed(err: impl std::fmt::Display) -> String {
    format!("<serialization failed: {err}>")
}

pub fn pretty_json<T: Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(serialization_failed)
}

fn compact_json<T: Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string(data).unwrap_or_else(serialization_failed)
}

fn yaml<T: Serialize + ?Sized>(data: &T) -> String {
    serde_yaml::to_string(data).unwrap_or_else(serialization_failed)
}
