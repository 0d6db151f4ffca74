use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ActiveResult, EnrichResult, ImportResult, ProgressEvent, ProgressSink};
use crate::fetch::FilterSuggestions;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_import(result: &ImportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_enrich(result: &EnrichResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_presets(result: &FilterSuggestions) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_active(result: &ActiveResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
