//! `featcat sync`: reconcile the local replica with the catalog.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::{ColoredString, Colorize};

use featcat_core::manifest;
use featcat_sync::{conflict_diffs, ExecutionReport, Outcome, SyncAction, SyncResult};

use super::{connect, repo_root};

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Propose local edits even when the remote also changed.
    #[arg(long)]
    pub prefer_local: bool,

    /// Discard the local replica and replace it with the remote catalog.
    #[arg(long, conflicts_with = "prefer_local")]
    pub force_remote: bool,

    /// Plan and print without proposing or saving anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let root = repo_root()?;
        let backend = connect()?;
        let mut replica = manifest::load_at(&root).context("failed to read local replica")?;

        if self.force_remote {
            let count = backend
                .force_remote(&mut replica)
                .context("failed to fetch the remote catalog")?;
            if self.dry_run {
                println!("[dry-run] would replace the local replica with {count} remote features");
                return Ok(());
            }
            manifest::save_at(&root, &replica).context("failed to save local replica")?;
            println!("{} Local replica replaced with {count} remote features", "✓".green());
            return Ok(());
        }

        let plan = backend
            .plan_sync(&replica, self.prefer_local)
            .context("sync planning failed")?;
        print_plan(&plan, backend.catalog_dir(), self.dry_run)?;
        if self.dry_run {
            println!("[dry-run] {} actions planned; nothing was changed", plan.actions.len());
            return Ok(());
        }

        let report = backend.execute_sync(&plan, &mut replica);
        manifest::save_at(&root, &replica).context("failed to save local replica")?;
        print_report(&report);
        if report.cancelled {
            bail!("sync stopped at the operation deadline (operation_timeout_secs)");
        }
        if report.failed > 0 {
            bail!("{} sync action(s) failed", report.failed);
        }
        Ok(())
    }
}

fn label(action: &SyncAction) -> ColoredString {
    let kind = action.kind();
    match action {
        SyncAction::None { .. } | SyncAction::ProposalPending { .. } => kind.bright_black(),
        SyncAction::CreateProposal { .. } | SyncAction::PushRemote { .. } => kind.cyan(),
        SyncAction::ProposalMerged { .. } | SyncAction::PullRemote { .. } => kind.green(),
        SyncAction::Conflict { .. } => kind.red().bold(),
        SyncAction::UnseenRemote { .. } => kind.yellow(),
    }
}

fn print_plan(plan: &SyncResult, catalog_dir: &str, dry_run: bool) -> Result<()> {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    if plan.actions.is_empty() {
        println!("{prefix}Nothing to sync.");
    }
    for action in &plan.actions {
        println!("{prefix}{:>16}  {}", label(action), action.description());
    }
    for warning in &plan.warnings {
        println!("{} {warning}", "warning:".yellow());
    }
    for diff in conflict_diffs(catalog_dir, &plan.actions).context("failed to render conflict")? {
        if diff.unified_diff.is_empty() {
            continue;
        }
        println!();
        print!("{}", diff.unified_diff);
        if !diff.unified_diff.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

fn print_report(report: &ExecutionReport) {
    for entry in &report.reports {
        match &entry.outcome {
            Outcome::Proposed(record) => println!(
                "  {} {}: merge request !{} {}",
                "✎".cyan(),
                record.local_id,
                record.mr_iid,
                record.mr_url
            ),
            Outcome::Failed(reason) => println!(
                "  {} {}: {reason}",
                "✗".red(),
                entry
                    .action
                    .local_id()
                    .map(|id| id.to_string())
                    .unwrap_or_default()
            ),
            _ => {}
        }
    }
    println!(
        "{} succeeded, {} failed, {} pending",
        report.succeeded, report.failed, report.pending
    );
    if report.conflicts > 0 {
        println!(
            "{} conflict(s) need attention; re-run with --prefer-local or --force-remote",
            report.conflicts
        );
    }
}
