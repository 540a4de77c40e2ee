use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::store::Id;

#[derive(Debug, Parser)]
#[command(author, version, about = "Versioned tabular store with cleaning transforms", long_about = None)]
pub struct Cli {
    /// Store file holding datasets, versions and row data
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,
    /// Acting identity, checked against dataset roles
    #[arg(long, global = true, default_value = "local")]
    pub user: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a dataset, optionally importing a CSV/ZIP/SQL source file
    Create(CreateArgs),
    /// Import a source file into a dataset that has no versions yet
    Import(ImportArgs),
    /// List datasets
    List,
    /// List a dataset's version history
    Versions(DatasetArgs),
    /// Print the current table of a dataset's latest version
    Show(ShowArgs),
    /// Export the current table to a CSV file
    Export(ExportArgs),
    /// Apply one cleaning transform, producing a new version
    Transform(TransformArgs),
    /// Join tables of the latest version into a new version
    Join(JoinArgs),
    /// Find near-duplicate values in a string column
    Duplicates(DuplicatesArgs),
    /// Apply a confirmed duplicate-replacement map
    Resolve(ResolveArgs),
    /// Delete the latest version (keeps at least one)
    Undo(DatasetArgs),
    /// Delete a dataset with its whole version history
    Delete(DatasetArgs),
    /// Grant a user access to a dataset
    Grant(GrantArgs),
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Dataset name (must be non-empty)
    #[arg(short, long)]
    pub name: String,
    /// Free-form description
    #[arg(short, long, default_value = "")]
    pub description: String,
    /// Source file to import as version 1 (.csv, .zip, .sql/.dump)
    #[arg(short, long)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Target dataset id
    #[arg(long = "db")]
    pub dataset: Id,
    /// Source file (.csv, .zip, .sql/.dump)
    #[arg(short, long)]
    pub source: PathBuf,
}

#[derive(Debug, Args)]
pub struct DatasetArgs {
    /// Dataset id
    #[arg(long = "db")]
    pub dataset: Id,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Dataset id
    #[arg(long = "db")]
    pub dataset: Id,
    /// Limit the number of printed rows
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Dataset id
    #[arg(long = "db")]
    pub dataset: Id,
    /// Output CSV file
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct TransformArgs {
    /// Dataset id
    #[arg(long = "db")]
    pub dataset: Id,
    #[command(subcommand)]
    pub op: TransformOp,
}

#[derive(Debug, Subcommand)]
pub enum TransformOp {
    /// Replace cells matching a literal value (or a regex on string columns)
    FindReplace {
        /// Target column; omit to apply to every column
        #[arg(short, long)]
        column: Option<String>,
        #[arg(long)]
        find: String,
        #[arg(long)]
        replace: String,
        /// Treat `find` as a regular expression (string columns only)
        #[arg(long)]
        regex: bool,
    },
    /// Min-max rescale a numeric column to [0, 1]
    Normalize {
        /// Target column; omit to normalize every numeric column
        #[arg(short, long)]
        column: Option<String>,
    },
    /// Drop rows farther than `range` standard deviations from the mean
    RemoveOutliers {
        /// Target column; omit to filter on every numeric column
        #[arg(short, long)]
        column: Option<String>,
        #[arg(long)]
        range: f64,
    },
    /// Fill missing cells with the column mean, median, or a literal
    FillEmpty {
        /// Target column; omit to fill every numeric column (mean/median only)
        #[arg(short, long)]
        column: Option<String>,
        #[arg(long, conflicts_with_all = ["median", "value"])]
        mean: bool,
        #[arg(long, conflicts_with = "value")]
        median: bool,
        #[arg(long)]
        value: Option<String>,
    },
    /// Bucket a numeric column into labeled intervals
    Discretize {
        #[arg(short, long)]
        column: String,
        /// Number of equal-width bins
        #[arg(long, conflicts_with_all = ["equifreq", "ranges"])]
        equiwidth: Option<usize>,
        /// Number of equal-population bins
        #[arg(long, conflicts_with = "ranges")]
        equifreq: Option<usize>,
        /// Explicit bucket boundaries
        #[arg(long, value_delimiter = ',')]
        ranges: Vec<f64>,
    },
    /// Expand a string column into one boolean column per distinct value
    OneHot {
        #[arg(short, long)]
        column: String,
        /// Prefix new columns with the source column's name
        #[arg(long)]
        use_old_name: bool,
    },
    /// Cast a column to string, int, float, or datetime
    ChangeType {
        #[arg(short, long)]
        column: String,
        #[arg(long = "to")]
        new_type: String,
    },
    /// Replace a datetime column with one extracted part
    Extract {
        #[arg(short, long)]
        column: String,
        /// One of: year, month, week, day, weekday
        #[arg(long)]
        part: String,
    },
    /// Delete one column
    DeleteColumn {
        #[arg(short, long)]
        column: String,
    },
}

#[derive(Debug, Args)]
pub struct JoinArgs {
    /// Dataset id
    #[arg(long = "db")]
    pub dataset: Id,
    /// Table ids of the latest version to join, in chain order
    #[arg(long = "tables", value_delimiter = ',', required = true)]
    pub table_ids: Vec<Id>,
    /// Repeatable key group: one column id per table, `_` for tables
    /// sitting the group out, e.g. `--key 4,18` or `--key 4,_,9`
    #[arg(long = "key", action = clap::ArgAction::Append)]
    pub keys: Vec<String>,
    /// Name of the joined result table
    #[arg(long, default_value = "JOIN")]
    pub name: String,
}

#[derive(Debug, Args)]
pub struct DuplicatesArgs {
    /// Dataset id
    #[arg(long = "db")]
    pub dataset: Id,
    /// String column to scan
    #[arg(short, long)]
    pub column: String,
    /// Maximum edit distance for two values to count as duplicates
    #[arg(long, default_value_t = 1)]
    pub distance: usize,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Dataset id
    #[arg(long = "db")]
    pub dataset: Id,
    /// String column to rewrite
    #[arg(short, long)]
    pub column: String,
    /// Repeatable `original=replacement` pair
    #[arg(long = "map", action = clap::ArgAction::Append, required = true)]
    pub replacements: Vec<String>,
    /// Collapse replacement chains transitively before applying
    #[arg(long)]
    pub chain: bool,
}

#[derive(Debug, Args)]
pub struct GrantArgs {
    /// Dataset id
    #[arg(long = "db")]
    pub dataset: Id,
    /// User to grant access to
    #[arg(long = "to")]
    pub grantee: String,
    /// Grant administrative rights as well
    #[arg(long)]
    pub admin: bool,
}

/// Parses one `--key` group: comma-separated column ids with `_` (or an
/// empty entry) marking tables that sit the group out.
pub fn parse_key_group(raw: &str) -> Result<Vec<Option<Id>>, String> {
    raw.split(',')
        .map(|part| {
            let part = part.trim();
            if part.is_empty() || part == "_" {
                return Ok(None);
            }
            part.parse::<Id>()
                .map(Some)
                .map_err(|_| format!("invalid column id '{part}' in key group '{raw}'"))
        })
        .collect()
}
