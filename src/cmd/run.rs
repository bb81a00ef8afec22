//! Interactive workflow run: `draftsmith run --job <file>`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use console::style;
use dialoguer::{Input, Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};

use draftsmith::backend::HttpBackend;
use draftsmith::card::CardStatus;
use draftsmith::config::{Config, ENV_TOKEN};
use draftsmith::phase::PhaseId;
use draftsmith::session::SessionStore;
use draftsmith::transport::{HeartbeatTransport, StaticTokenSource};
use draftsmith::workflow::{CardView, Orchestrator};

/// Run the whole workflow: init, background fan-out, card-by-card
/// approval through both phases, then print the assembled letter and the
/// correction summary.
pub async fn cmd_run(config: Config, job_file: &Path, yes: bool) -> Result<()> {
    config.validate()?;
    let job_text = std::fs::read_to_string(job_file)
        .with_context(|| format!("Failed to read job posting: {}", job_file.display()))?;
    let token = config
        .token
        .clone()
        .with_context(|| format!("No API token; set {ENV_TOKEN} or `token` in the config file"))?;

    let session = Arc::new(SessionStore::new(&job_text, config.metadata.clone()));
    let transport = HeartbeatTransport::new(
        &config.base_url,
        config.timeout(),
        Arc::new(StaticTokenSource(token.clone())),
        session.clone(),
    )?;
    transport.set_token(&token).await;
    let orchestrator = Orchestrator::new(
        Arc::new(HttpBackend::new(transport)),
        session,
        config.no_issue_sentinel.as_deref(),
    );

    let spinner = fan_out_spinner(&format!(
        "Researching with {} vendor(s)...",
        config.vendors.len()
    ));
    orchestrator.start(&config.vendors).await?;
    spinner.finish_and_clear();

    for phase in PhaseId::ALL {
        drive_phase(&orchestrator, phase, yes).await?;
    }

    print_result(&orchestrator).await;
    Ok(())
}

fn fan_out_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let spinner_style = ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .expect("progress bar template is a valid static string");
    spinner.set_style(spinner_style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Approve every card of one phase, prompting per vendor. With `--yes`
/// the READY cards are bulk-approved and the rest surfaced as errors.
async fn drive_phase(orchestrator: &Orchestrator, phase: PhaseId, yes: bool) -> Result<()> {
    println!();
    println!("{}", style(format!("== {} ==", phase.title())).bold());

    if yes {
        // Non-interactive: accept machine feedback as-is, bulk-approve
        // whatever is READY, and report what was left behind.
        if phase == PhaseId::Refine {
            let snapshot = orchestrator.snapshot().await;
            if let Some(view) = snapshot.phases.iter().find(|p| p.phase == phase) {
                for card in &view.cards {
                    if card.unresolved_feedback > 0 {
                        orchestrator.approve_all_feedback(&card.vendor).await?;
                    }
                }
            }
        }
        let approved = orchestrator.approve_all(phase).await?;
        println!("Approved {} card(s).", approved.len());
        let snapshot = orchestrator.snapshot().await;
        if let Some(view) = snapshot.phases.iter().find(|p| p.phase == phase) {
            for card in &view.cards {
                if card.status != CardStatus::Approved {
                    println!(
                        "  {} {} was not approved ({})",
                        style("!").yellow(),
                        card.vendor,
                        card.error.as_deref().unwrap_or("no data")
                    );
                }
            }
        }
        return Ok(());
    }
    loop {
        let snapshot = orchestrator.snapshot().await;
        let Some(view) = snapshot.phases.iter().find(|p| p.phase == phase) else {
            break;
        };
        if view.counters.total > 0 && view.counters.approved == view.counters.total {
            break;
        }
        let Some(card) = view
            .cards
            .iter()
            .find(|c| c.status != CardStatus::Approved)
        else {
            break;
        };
        prompt_card(orchestrator, phase, card).await?;
    }
    Ok(())
}

async fn prompt_card(
    orchestrator: &Orchestrator,
    phase: PhaseId,
    card: &CardView,
) -> Result<()> {
    println!();
    println!(
        "{} [{}] {}",
        style(&card.vendor).bold().cyan(),
        status_label(card),
        style(format!("${:.4}", card.cost)).dim()
    );
    if let Some(error) = &card.error {
        println!("  {} {}", style("error:").red(), error);
    }
    if let Some(text) = &card.text {
        println!("{}", indent(text));
    }

    match card.status {
        CardStatus::Pending => {
            let options = &["Retry the request", "Type the content by hand", "Abort"];
            let selection = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("This card has no data yet")
                .items(options)
                .default(0)
                .interact()?;
            match selection {
                0 => orchestrator.retry(phase, &card.vendor).await?,
                1 => {
                    let text: String = Input::with_theme(&ColorfulTheme::default())
                        .with_prompt(phase.primary_field())
                        .interact_text()?;
                    orchestrator
                        .record_edit(phase, &card.vendor, phase.primary_field(), &text)
                        .await?;
                }
                _ => bail!("Aborted"),
            }
        }
        CardStatus::Ready | CardStatus::Approved => {
            if phase == PhaseId::Refine && card.unresolved_feedback > 0 {
                review_feedback(orchestrator, &card.vendor).await?;
                return Ok(());
            }
            let options = &["Approve", "Edit the text", "Regenerate", "Abort"];
            let selection = Select::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Approve {} for {}?", phase, card.vendor))
                .items(options)
                .default(0)
                .interact()?;
            match selection {
                0 => {
                    if let Err(err) = orchestrator
                        .approve(phase, &card.vendor, &BTreeMap::new())
                        .await
                    {
                        println!("  {} {}", style("cannot approve:").yellow(), err);
                    }
                }
                1 => {
                    let text: String = Input::with_theme(&ColorfulTheme::default())
                        .with_prompt(phase.primary_field())
                        .interact_text()?;
                    orchestrator
                        .record_edit(phase, &card.vendor, phase.primary_field(), &text)
                        .await?;
                }
                2 => orchestrator.rerun_from(phase, &card.vendor).await?,
                _ => bail!("Aborted"),
            }
        }
    }
    Ok(())
}

/// Walk the unreviewed feedback items for one vendor's refine card.
async fn review_feedback(orchestrator: &Orchestrator, vendor: &str) -> Result<()> {
    let snapshot = orchestrator.snapshot().await;
    let unresolved = snapshot
        .phases
        .iter()
        .find(|p| p.phase == PhaseId::Refine)
        .and_then(|p| p.cards.iter().find(|c| c.vendor == vendor))
        .map(|c| c.unresolved_feedback)
        .unwrap_or(0);
    println!(
        "  {} unreviewed feedback item(s) block approval",
        style(unresolved).yellow()
    );

    let mut key = orchestrator.next_feedback(vendor).await?;
    while let Some(current) = key {
        if let Some(text) = orchestrator.feedback_text(vendor, &current).await {
            println!("  {} {}", style(format!("{current}:")).bold(), text);
        }
        let options = &["Accept as-is", "Edit", "Clear (discard this item)", "Stop"];
        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Feedback \"{current}\""))
            .items(options)
            .default(0)
            .interact()?;
        key = match selection {
            0 => orchestrator.approve_feedback(vendor, &current).await?,
            1 => {
                let text: String = Input::with_theme(&ColorfulTheme::default())
                    .with_prompt("Replacement critique")
                    .interact_text()?;
                orchestrator.override_feedback(vendor, &current, &text).await?
            }
            2 => orchestrator.override_feedback(vendor, &current, "").await?,
            _ => break,
        };
    }
    Ok(())
}

async fn print_result(orchestrator: &Orchestrator) {
    println!();
    println!("{}", style("== Assembled letter ==").bold());
    for paragraph in orchestrator.paragraphs().await {
        let source = paragraph.vendor.as_deref().unwrap_or("you");
        println!("{}", style(format!("[{source}]")).dim());
        println!("{}", paragraph.text);
        println!();
    }

    let corrections = orchestrator.corrections().await;
    if !corrections.is_empty() {
        println!("{}", style("== Corrections ==").bold());
        for (vendor, records) in &corrections {
            println!("{}: {} correction(s)", style(vendor).cyan(), records.len());
        }
    }
    println!(
        "Total cost: {}",
        style(format!("${:.4}", orchestrator.session().total_cost())).bold()
    );
}

fn status_label(card: &CardView) -> console::StyledObject<&'static str> {
    match card.status {
        CardStatus::Pending => style("PENDING").yellow(),
        CardStatus::Ready => style("READY").green(),
        CardStatus::Approved if card.dirty => style("APPROVED*").magenta(),
        CardStatus::Approved => style("APPROVED").blue(),
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("    {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}
