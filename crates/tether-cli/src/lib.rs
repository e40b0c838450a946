use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

pub mod commands;
pub mod setup;

/// How commands that report state print it
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured listing for a terminal
    #[default]
    Pretty,
    /// Pretty-printed JSON, field names as on the serve protocol
    Json,
    /// Fixed-width columns
    Table,
}

impl OutputFormat {
    /// `value` as JSON text, or `None` when the caller renders it itself
    pub fn render_json<T: Serialize>(self, value: &T) -> Result<Option<String>> {
        match self {
            OutputFormat::Json => Ok(Some(serde_json::to_string_pretty(value)?)),
            OutputFormat::Pretty | OutputFormat::Table => Ok(None),
        }
    }

    /// Print `value` as JSON if that format was chosen. Returns whether it did.
    pub fn print_json<T: Serialize>(self, value: &T) -> Result<bool> {
        match self.render_json(value)? {
            Some(json) => {
                println!("{}", json);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_json_format_renders_json() {
        let value = serde_json::json!({ "id": "fresh-chrome", "activable": true });

        let json = OutputFormat::Json.render_json(&value).unwrap().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["id"], "fresh-chrome");

        assert!(OutputFormat::Pretty.render_json(&value).unwrap().is_none());
        assert!(OutputFormat::Table.render_json(&value).unwrap().is_none());
    }

    #[test]
    fn test_format_parses_from_flag_value() {
        assert_eq!(OutputFormat::from_str("table", true), Ok(OutputFormat::Table));
        assert_eq!(OutputFormat::default(), OutputFormat::Pretty);
        assert!(OutputFormat::from_str("yaml", true).is_err());
    }
}
