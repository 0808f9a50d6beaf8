//! `featcat pending`: the proposal ledger, read locally.

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use featcat_sync::ProposalStore;

use super::{print_json, repo_root};

#[derive(Args, Debug)]
pub struct PendingArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct PendingRow {
    #[tabled(rename = "feature")]
    local_id: String,
    #[tabled(rename = "op")]
    operation: String,
    #[tabled(rename = "mr")]
    mr: String,
    #[tabled(rename = "url")]
    url: String,
    #[tabled(rename = "opened")]
    opened: String,
}

impl PendingArgs {
    pub fn run(self) -> Result<()> {
        let root = repo_root()?;
        let store = ProposalStore::load_at(&root).context("failed to read proposal ledger")?;
        if self.json {
            return print_json(&store.records());
        }
        if store.is_empty() {
            println!("No pending proposals.");
            return Ok(());
        }
        let rows: Vec<PendingRow> = store
            .records()
            .iter()
            .map(|r| PendingRow {
                local_id: if r.server_id.is_empty() || r.server_id == r.local_id {
                    r.local_id.clone()
                } else {
                    format!("{} → {}", r.local_id, r.server_id)
                },
                operation: r.operation.to_string(),
                mr: format!("!{}", r.mr_iid),
                url: r.mr_url.clone(),
                opened: r.created_at.format("%Y-%m-%d %H:%M").to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
