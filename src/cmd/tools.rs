//! Small non-interactive commands: vendor listing and the diff debugging
//! aid.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use draftsmith::config::Config;
use draftsmith::diff::{self, CorrectionKind};

/// `draftsmith vendors`: print the configured vendor fan-out.
pub fn cmd_vendors(config: &Config) -> Result<()> {
    if config.vendors.is_empty() {
        println!("{}", style("No vendors configured.").yellow());
        return Ok(());
    }
    println!("Configured vendors ({}):", config.vendors.len());
    for vendor in &config.vendors {
        println!("  {} {}", style("•").cyan(), vendor);
    }
    Ok(())
}

/// `draftsmith diff <original> <edited>`: print the correction records
/// the assembly step would emit for these two files.
pub fn cmd_diff(original: &Path, edited: &Path) -> Result<()> {
    let original_text = std::fs::read_to_string(original)
        .with_context(|| format!("Failed to read {}", original.display()))?;
    let edited_text = std::fs::read_to_string(edited)
        .with_context(|| format!("Failed to read {}", edited.display()))?;

    let records = diff::diff(original_text.trim(), edited_text.trim());
    if records.is_empty() {
        println!("{}", style("No changes.").green());
        return Ok(());
    }
    for (i, record) in records.iter().enumerate() {
        match record.kind {
            CorrectionKind::Full => {
                println!("{} {}", style(format!("[{i}]")).bold(), style("full rewrite").magenta());
            }
            CorrectionKind::Diff => {
                println!("{} {}", style(format!("[{i}]")).bold(), style("diff").cyan());
            }
        }
        println!("  {} {}", style("-").red(), record.original);
        println!("  {} {}", style("+").green(), record.edited);
    }
    Ok(())
}
