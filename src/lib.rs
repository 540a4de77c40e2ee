pub mod cli;
pub mod config;
pub mod data;
pub mod dedup;
pub mod dump;
pub mod engine;
pub mod error;
pub mod frame;
pub mod import;
pub mod join;
pub mod lock;
pub mod sqltype;
pub mod store;
pub mod table;
pub mod transform;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::cli::{Cli, Commands, TransformOp};
use crate::config::StoreConfig;
use crate::dedup::find_duplicates_in_column;
use crate::join::JoinSpec;
use crate::lock::DatasetLocks;
use crate::store::{Id, MemoryMembership, Store};
use crate::transform::{CastKind, DatePart, Transform};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tabvault", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

/// Everything the CLI persists between invocations: the store itself plus
/// the role grants backing the access-control predicates.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Workspace {
    pub store: Store,
    pub members: MemoryMembership,
}

impl Workspace {
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Workspace::default());
        }
        let file = File::open(path).with_context(|| format!("Opening store file {path:?}"))?;
        let workspace =
            serde_json::from_reader(BufReader::new(file)).context("Parsing store JSON")?;
        Ok(workspace)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating store file {path:?}"))?;
        serde_json::to_writer_pretty(file, self).context("Writing store JSON")
    }
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = StoreConfig::default();
    if let Some(path) = &cli.store {
        config.store_path = path.clone();
    }
    let mut workspace = Workspace::load_or_default(&config.store_path)?;
    let locks = DatasetLocks::new();
    let user = cli.user.clone();

    let mutated = match cli.command {
        Commands::Create(args) => {
            let dataset = import::create_dataset_from_file(
                &mut workspace.store,
                &config,
                &mut workspace.members,
                &user,
                &args.name,
                &args.description,
                args.source.as_deref(),
            )?;
            println!("created dataset {dataset}");
            true
        }
        Commands::Import(args) => {
            require_owner(&workspace, args.dataset, &user)?;
            let _guard = locks.try_lock(args.dataset)?;
            let version =
                import::import_file(&mut workspace.store, &config, args.dataset, &args.source)?;
            println!("imported into version {}", workspace.store.version(version)?.number);
            true
        }
        Commands::List => {
            let headers = ["id", "name", "description", "versions"].map(String::from);
            let rows: Vec<Vec<String>> = workspace
                .store
                .datasets()
                .map(|d| {
                    vec![
                        d.id.to_string(),
                        d.name.clone(),
                        d.description.clone(),
                        d.version_ids.len().to_string(),
                    ]
                })
                .collect();
            print!("{}", table::render_table(&headers, &rows));
            false
        }
        Commands::Versions(args) => {
            require_member(&workspace, args.dataset, &user)?;
            let headers = ["version", "id", "description", "loaded"].map(String::from);
            let dataset = workspace.store.dataset(args.dataset)?;
            let rows: Vec<Vec<String>> = dataset
                .version_ids
                .iter()
                .map(|&id| {
                    let version = workspace.store.version(id)?;
                    Ok(vec![
                        version.number.to_string(),
                        version.id.to_string(),
                        version.description.clone(),
                        version.loaded.to_string(),
                    ])
                })
                .collect::<crate::error::Result<_>>()?;
            print!("{}", table::render_table(&headers, &rows));
            false
        }
        Commands::Show(args) => {
            require_member(&workspace, args.dataset, &user)?;
            let table_id = workspace.store.current_table(args.dataset)?.id;
            let snapshot = workspace.store.snapshot(table_id)?;
            print!("{}", table::render_frame(&snapshot, args.limit));
            false
        }
        Commands::Export(args) => {
            require_member(&workspace, args.dataset, &user)?;
            let table_id = workspace.store.current_table(args.dataset)?.id;
            let snapshot = workspace.store.snapshot(table_id)?;
            snapshot.to_csv_path(&args.output)?;
            println!("exported {} row(s) to {}", snapshot.row_count(), args.output.display());
            false
        }
        Commands::Transform(args) => {
            require_owner(&workspace, args.dataset, &user)?;
            let _guard = locks.try_lock(args.dataset)?;
            let transform = build_transform(&args.op)?;
            let version =
                transform::apply_and_commit(&mut workspace.store, args.dataset, &transform)?;
            println!("committed version {}", workspace.store.version(version)?.number);
            true
        }
        Commands::Join(args) => {
            require_owner(&workspace, args.dataset, &user)?;
            let _guard = locks.try_lock(args.dataset)?;
            let key_groups = args
                .keys
                .iter()
                .map(|raw| cli::parse_key_group(raw).map_err(|e| anyhow!(e)))
                .collect::<Result<Vec<_>>>()?;
            let spec = JoinSpec {
                table_ids: args.table_ids,
                key_groups,
            };
            let version =
                join::join_and_commit(&mut workspace.store, args.dataset, &spec, &args.name)?;
            println!("committed version {}", workspace.store.version(version)?.number);
            true
        }
        Commands::Duplicates(args) => {
            require_member(&workspace, args.dataset, &user)?;
            let table_id = workspace.store.current_table(args.dataset)?.id;
            let snapshot = workspace.store.snapshot(table_id)?;
            let column = snapshot
                .column(&args.column)
                .ok_or_else(|| anyhow!("no column named '{}'", args.column))?;
            let clusters = find_duplicates_in_column(column, args.distance);
            let headers = ["value", "candidates"].map(String::from);
            let rows: Vec<Vec<String>> = clusters
                .iter()
                .map(|(anchor, ranked)| vec![anchor.clone(), ranked.join(", ")])
                .collect();
            print!("{}", table::render_table(&headers, &rows));
            false
        }
        Commands::Resolve(args) => {
            require_owner(&workspace, args.dataset, &user)?;
            let _guard = locks.try_lock(args.dataset)?;
            let transform = Transform::ReplaceDuplicates {
                column: args.column,
                replacements: parse_replacements(&args.replacements)?,
                chain: args.chain,
            };
            let version =
                transform::apply_and_commit(&mut workspace.store, args.dataset, &transform)?;
            println!("committed version {}", workspace.store.version(version)?.number);
            true
        }
        Commands::Undo(args) => {
            require_owner(&workspace, args.dataset, &user)?;
            let _guard = locks.try_lock(args.dataset)?;
            let removed = workspace
                .store
                .latest_version(args.dataset)?
                .map(|v| v.number)
                .ok_or_else(|| anyhow!("dataset {} has no versions", args.dataset))?;
            workspace.store.undo(args.dataset)?;
            println!("removed version {removed}");
            true
        }
        Commands::Delete(args) => {
            require_owner(&workspace, args.dataset, &user)?;
            let _guard = locks.try_lock(args.dataset)?;
            workspace.store.delete_dataset(args.dataset)?;
            println!("deleted dataset {}", args.dataset);
            true
        }
        Commands::Grant(args) => {
            require_owner(&workspace, args.dataset, &user)?;
            if args.admin {
                workspace
                    .store
                    .add_admin(&mut workspace.members, args.dataset, &args.grantee)?;
            } else {
                workspace
                    .store
                    .add_member(&mut workspace.members, args.dataset, &args.grantee)?;
            }
            println!("granted {} access to dataset {}", args.grantee, args.dataset);
            true
        }
    };

    if mutated {
        workspace.save(&config.store_path)?;
    }
    Ok(())
}

fn require_member(workspace: &Workspace, dataset: Id, user: &str) -> Result<()> {
    if !workspace.store.is_member(&workspace.members, dataset, user)? {
        bail!("user '{user}' has no access to dataset {dataset}");
    }
    Ok(())
}

fn require_owner(workspace: &Workspace, dataset: Id, user: &str) -> Result<()> {
    if !workspace.store.is_owner(&workspace.members, dataset, user)? {
        bail!("user '{user}' cannot administer dataset {dataset}");
    }
    Ok(())
}

fn parse_replacements(raw: &[String]) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .ok_or_else(|| anyhow!("invalid replacement '{pair}', expected original=replacement"))
        })
        .collect()
}

fn build_transform(op: &TransformOp) -> Result<Transform> {
    let transform = match op {
        TransformOp::FindReplace { column, find, replace, regex } => match (column, regex) {
            (Some(column), true) => Transform::FindReplaceRegex {
                column: column.clone(),
                pattern: find.clone(),
                replace: replace.clone(),
            },
            (Some(column), false) => Transform::FindReplace {
                column: column.clone(),
                find: find.clone(),
                replace: replace.clone(),
            },
            (None, false) => Transform::FindReplaceAll {
                find: find.clone(),
                replace: replace.clone(),
            },
            (None, true) => bail!("--regex requires --column"),
        },
        TransformOp::Normalize { column } => match column {
            Some(column) => Transform::Normalize { column: column.clone() },
            None => Transform::NormalizeAll,
        },
        TransformOp::RemoveOutliers { column, range } => match column {
            Some(column) => Transform::RemoveOutliers { column: column.clone(), range: *range },
            None => Transform::RemoveAllOutliers { range: *range },
        },
        TransformOp::FillEmpty { column, mean, median, value } => {
            match (column, *mean, *median, value) {
                (Some(column), true, false, None) => {
                    Transform::FillEmptyMean { column: column.clone() }
                }
                (Some(column), false, true, None) => {
                    Transform::FillEmptyMedian { column: column.clone() }
                }
                (Some(column), false, false, Some(value)) => Transform::FillEmptyValue {
                    column: column.clone(),
                    value: value.clone(),
                },
                (None, true, false, None) => Transform::FillAllEmptyMean,
                (None, false, true, None) => Transform::FillAllEmptyMedian,
                _ => bail!("fill-empty needs exactly one of --mean, --median, or --value (literal fills need --column)"),
            }
        }
        TransformOp::Discretize { column, equiwidth, equifreq, ranges } => {
            match (equiwidth, equifreq, ranges.is_empty()) {
                (Some(bins), None, true) => Transform::DiscretizeEquiwidth {
                    column: column.clone(),
                    bins: *bins,
                },
                (None, Some(bins), true) => Transform::DiscretizeEquifreq {
                    column: column.clone(),
                    bins: *bins,
                },
                (None, None, false) => Transform::DiscretizeRanges {
                    column: column.clone(),
                    boundaries: ranges.clone(),
                },
                _ => bail!("discretize needs exactly one of --equiwidth, --equifreq, or --ranges"),
            }
        }
        TransformOp::OneHot { column, use_old_name } => Transform::OneHotEncode {
            column: column.clone(),
            use_old_name: *use_old_name,
        },
        TransformOp::ChangeType { column, new_type } => {
            let new_type = match new_type.as_str() {
                "string" => CastKind::String,
                "int" => CastKind::Int,
                "float" => CastKind::Float,
                "datetime" => CastKind::DateTime,
                other => bail!("unknown target type '{other}' (expected string, int, float, or datetime)"),
            };
            Transform::ChangeType { column: column.clone(), new_type }
        }
        TransformOp::Extract { column, part } => {
            let part = match part.as_str() {
                "year" => DatePart::Year,
                "month" => DatePart::Month,
                "week" => DatePart::Week,
                "day" => DatePart::Day,
                "weekday" => DatePart::Weekday,
                other => bail!("unknown datetime part '{other}' (expected year, month, week, day, or weekday)"),
            };
            Transform::ExtractFromDatetime { column: column.clone(), part }
        }
        TransformOp::DeleteColumn { column } => Transform::DeleteColumn { column: column.clone() },
    };
    Ok(transform)
}
