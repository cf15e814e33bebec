//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - unit: run the pipeline for one unit
//! - bulk: discover units and run the pipeline over all of them
//! - validate: check configuration and collection profile offline

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lmsflow::pipeline::BulkFilters;

/// lmsflow - rate-limited LMS data collection pipeline
#[derive(Parser, Debug)]
#[command(name = "lmsflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write the JSON result document to this file
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Print scheduler metrics after the run
    #[arg(short, long, global = true)]
    pub metrics: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect, transform and assemble a single unit
    Unit {
        /// Unit (course) ID
        id: u64,
    },

    /// Discover matching units and process them in one bulk run
    Bulk {
        /// Stop after this many units
        #[arg(long)]
        max_units: Option<usize>,

        /// Enrollment state filter (e.g. active)
        #[arg(short, long)]
        state: Option<String>,

        /// Search term applied to unit names
        #[arg(long)]
        search: Option<String>,

        /// Include concluded units
        #[arg(long)]
        include_completed: bool,
    },

    /// Validate configuration and collection profile without network access
    Validate,
}

impl Commands {
    /// Bulk filters for a `bulk` command.
    pub fn bulk_filters(&self) -> Option<BulkFilters> {
        match self {
            Commands::Bulk {
                max_units,
                state,
                search,
                include_completed,
            } => Some(BulkFilters {
                max_units: *max_units,
                enrollment_state: state.clone(),
                search_term: search.clone(),
                include_completed: *include_completed,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["lmsflow"]).is_err());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["lmsflow", "-v", "validate"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["lmsflow", "-c", "/path/to/lmsflow.yml", "validate"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/lmsflow.yml")));
    }

    #[test]
    fn test_unit_command() {
        let cli = Cli::try_parse_from(["lmsflow", "unit", "42", "--output", "out.json", "--metrics"]).unwrap();
        match cli.command {
            Commands::Unit { id } => assert_eq!(id, 42),
            _ => panic!("Expected unit command"),
        }
        assert_eq!(cli.output, Some(PathBuf::from("out.json")));
        assert!(cli.metrics);
    }

    #[test]
    fn test_unit_rejects_non_numeric_id() {
        assert!(Cli::try_parse_from(["lmsflow", "unit", "abc"]).is_err());
    }

    #[test]
    fn test_bulk_filters() {
        let cli = Cli::try_parse_from([
            "lmsflow",
            "bulk",
            "--max-units",
            "5",
            "--state",
            "active",
            "--include-completed",
        ])
        .unwrap();
        let filters = cli.command.bulk_filters().unwrap();
        assert_eq!(filters.max_units, Some(5));
        assert_eq!(filters.enrollment_state.as_deref(), Some("active"));
        assert!(filters.search_term.is_none());
        assert!(filters.include_completed);
    }

    #[test]
    fn test_validate_has_no_filters() {
        let cli = Cli::try_parse_from(["lmsflow", "validate"]).unwrap();
        assert!(cli.command.bulk_filters().is_none());
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}
