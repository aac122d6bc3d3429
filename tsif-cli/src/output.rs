use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{Table, Tabled};
use tsif_core::{Result, TsifError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Renders one document. Nested data has no table form, so `Table`
    /// prints YAML.
    pub fn document<T: Serialize>(self, data: &T) -> Result<String> {
        match self {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(data)?),
            OutputFormat::Table | OutputFormat::Yaml => {
                serde_yaml::to_string(data).map_err(|e| TsifError::Other(e.into()))
            }
        }
    }

    /// Renders rows; an empty table prints `empty` instead.
    pub fn rows<T: Tabled + Serialize>(self, rows: Vec<T>, empty: &str) -> Result<String> {
        match self {
            OutputFormat::Table if rows.is_empty() => Ok(empty.to_string()),
            OutputFormat::Table => Ok(Table::new(rows).to_string()),
            _ => self.document(&rows),
        }
    }

    pub fn is_table(self) -> bool {
        self == OutputFormat::Table
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Step,
    Done,
    Info,
    Warning,
    Failure,
}

impl Notice {
    fn marker(self) -> ColoredString {
        match self {
            Notice::Step => "⟳".cyan(),
            Notice::Done => "✓".green(),
            Notice::Info => "ℹ".blue(),
            Notice::Warning => "⚠".yellow(),
            Notice::Failure => "✗".red(),
        }
    }

    pub fn line(self, message: &str) -> String {
        format!("{} {}", self.marker(), message)
    }
}

/// Writes status lines around command output. Failures always go to stderr;
/// with JSON or YAML output everything does, keeping stdout parseable.
#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    format: OutputFormat,
}

impl Reporter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn notice(&self, notice: Notice, message: impl AsRef<str>) {
        let line = notice.line(message.as_ref());
        if notice == Notice::Failure || !self.format.is_table() {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    pub fn step(&self, message: impl AsRef<str>) {
        self.notice(Notice::Step, message);
    }

    pub fn done(&self, message: impl AsRef<str>) {
        self.notice(Notice::Done, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.notice(Notice::Info, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.notice(Notice::Warning, message);
    }

    pub fn fail(&self, message: impl AsRef<str>) {
        self.notice(Notice::Failure, message);
    }
}
