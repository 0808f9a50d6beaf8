//! Remote catalog commands: `list`, `show`, `search`, `suggest`, `create`,
//! `update`, `delete`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use featcat_core::{codec, FeatureId};
use featcat_sync::{FeatureBackend, PendingMr};

use super::{connect, print_feature_table, print_json, FeatureFields};

const DEFAULT_LIMIT: usize = 10;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let features = connect()?.list_all().context("failed to list features")?;
        if self.json {
            return print_json(&features);
        }
        if features.is_empty() {
            println!("The catalog is empty.");
            return Ok(());
        }
        print_feature_table(&features);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Feature id (FT-NNNNNN).
    pub id: String,
}

impl ShowArgs {
    pub fn run(self) -> Result<()> {
        let id = FeatureId::from(self.id.as_str());
        let feature = connect()?
            .get_feature(&id)
            .with_context(|| format!("could not show {id}"))?;
        print!("{}", codec::format(&feature).context("failed to encode feature")?);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    pub query: String,

    /// Maximum number of results.
    #[arg(long, default_value_t = DEFAULT_LIMIT)]
    pub limit: usize,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl SearchArgs {
    pub fn run(self) -> Result<()> {
        let hits = connect()?
            .search(&self.query, self.limit)
            .context("search failed")?;
        if self.json {
            return print_json(&hits);
        }
        if hits.is_empty() {
            println!("No features match '{}'.", self.query);
            return Ok(());
        }
        print_feature_table(&hits);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct SuggestArgs {
    pub query: String,

    #[arg(long, default_value_t = DEFAULT_LIMIT)]
    pub limit: usize,
}

impl SuggestArgs {
    pub fn run(self) -> Result<()> {
        for s in connect()?
            .suggest(&self.query, self.limit)
            .context("suggest failed")?
        {
            println!("{}\t{}", s.id, s.name);
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[command(flatten)]
    pub fields: FeatureFields,
}

impl CreateArgs {
    pub fn run(self) -> Result<()> {
        let draft = self.fields.to_feature()?;
        let (feature, record) = connect()?
            .propose_create(&draft, None)
            .context("create failed")?;
        println!("{} Proposed {} \"{}\"", "✓".green(), feature.id, feature.name);
        print_proposal(&record);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Feature id (FT-NNNNNN).
    pub id: String,

    #[command(flatten)]
    pub fields: FeatureFields,
}

impl UpdateArgs {
    pub fn run(self) -> Result<()> {
        let id = FeatureId::from(self.id.as_str());
        let (_, record) = connect()?
            .propose_update(&id, &self.fields.to_patch())
            .with_context(|| format!("update of {id} failed"))?;
        println!("{} Proposed changes to {id}", "✓".green());
        print_proposal(&record);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Feature id (FT-NNNNNN).
    pub id: String,
}

impl DeleteArgs {
    pub fn run(self) -> Result<()> {
        let id = FeatureId::from(self.id.as_str());
        let record = connect()?
            .propose_delete(&id)
            .with_context(|| format!("delete of {id} failed"))?;
        println!("{} Proposed removing {id}", "✓".green());
        print_proposal(&record);
        Ok(())
    }
}

fn print_proposal(record: &PendingMr) {
    println!("  merge request !{}  {}", record.mr_iid, record.mr_url);
    println!("  branch        {}", record.branch.bright_black());
}
