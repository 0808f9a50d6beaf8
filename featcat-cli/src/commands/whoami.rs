//! `featcat whoami`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use featcat_sync::FeatureBackend;

use super::{connect, print_json};

#[derive(Args, Debug)]
pub struct WhoamiArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl WhoamiArgs {
    pub fn run(self) -> Result<()> {
        let info = connect()?
            .auth_info()
            .context("could not read the authenticated user")?;
        if self.json {
            return print_json(&info);
        }
        println!("{} ({})", info.username.bold(), info.display_name);
        println!("  role     {}", info.access_level);
        println!("  backend  {}", info.mode);
        if info.can_propose {
            println!("  {} can propose catalog changes", "✓".green());
        } else {
            println!(
                "  {} cannot propose catalog changes (developer role or above required)",
                "✗".red()
            );
        }
        Ok(())
    }
}
