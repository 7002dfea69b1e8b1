//! Output format of the run report.
//!
//! `OutputFormat` is used as the `--output` CLI flag value.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Rendering of the final run report.
///
/// Passed as `--output` on the command line. Defaults to [`OutputFormat::Text`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Human-readable summary. Default.
    #[default]
    Text,
    /// Single JSON document, suitable for CI tooling.
    Json,
}
