//! `featcat local add` and `featcat local list` (local replica only).

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use featcat_core::{manifest, LocalFeature};

use super::{print_json, repo_root, FeatureFields};

#[derive(Subcommand, Debug)]
pub enum LocalCommand {
    /// Add a draft feature; `sync` proposes it.
    Add(AddArgs),

    /// List the local replica.
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    #[command(flatten)]
    pub fields: FeatureFields,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(cmd: LocalCommand) -> Result<()> {
    match cmd {
        LocalCommand::Add(args) => add(args),
        LocalCommand::List(args) => list(args),
    }
}

fn add(args: AddArgs) -> Result<()> {
    let draft = args.fields.to_feature()?;
    let root = repo_root()?;
    let mut replica = manifest::load_at(&root).context("failed to read local replica")?;
    let id = replica.add_draft(draft);
    manifest::save_at(&root, &replica).context("failed to save local replica")?;
    println!("Added draft {id}");
    println!("Run `featcat sync` to propose it.");
    Ok(())
}

#[derive(Tabled)]
struct LocalRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "last synced")]
    last_synced: String,
}

#[derive(Serialize)]
struct LocalJson<'a> {
    #[serde(flatten)]
    entry: &'a LocalFeature,
    state: &'static str,
}

fn state(entry: &LocalFeature) -> &'static str {
    match (entry.is_synced(), entry.last_synced_at) {
        (false, _) => "draft",
        (true, None) => "never synced",
        (true, Some(_)) => "synced",
    }
}

fn list(args: ListArgs) -> Result<()> {
    let root = repo_root()?;
    let replica = manifest::load_at(&root).context("failed to read local replica")?;
    let entries = replica.sorted();

    if args.json {
        let payload: Vec<LocalJson<'_>> = entries
            .iter()
            .map(|entry| LocalJson { entry, state: state(entry) })
            .collect();
        return print_json(&payload);
    }
    if entries.is_empty() {
        println!("No local features. Add one with `featcat local add`.");
        return Ok(());
    }
    let rows: Vec<LocalRow> = entries
        .iter()
        .map(|e| LocalRow {
            id: e.id().to_string(),
            name: e.feature.name.clone(),
            state: state(e).to_string(),
            last_synced: e
                .last_synced_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
