//! `vibestudy sync ...` and `vibestudy progress`.

use anyhow::{bail, Result};
use tracing::info;

use vibestudy_config::VibeStudyConfig;
use vibestudy_core::{Day, DayProgress, ProgressStore};
use vibestudy_sync::SyncOutcome;

use crate::client;
use crate::terminal_output::{
    note_error, note_info, note_success, note_warn, render_fields, render_table,
};
use crate::SyncAction;

pub(crate) async fn run(config: &VibeStudyConfig, action: SyncAction) -> Result<()> {
    let manager = client::sync_manager(config)?;

    let (label, ticket) = match action {
        SyncAction::Code(args) => {
            let code = args.content().await?;
            ("code", manager.sync_code(args.day, code).await)
        }
        SyncAction::Notes(args) => {
            let notes = args.content().await?;
            ("notes", manager.sync_notes(args.day, notes).await)
        }
        SyncAction::Recap(args) => {
            let answer = args.content().await?;
            ("recap answer", manager.sync_recap_answer(args.day, answer).await)
        }
        SyncAction::Task { day, task_id, undone } => (
            "task",
            manager.sync_task_completion(day, task_id, !undone).await,
        ),
        SyncAction::Complete { day } => ("day completion", manager.sync_day_completion(day).await),
    };

    let outcome = ticket.wait().await;
    let stats = manager.stats();
    manager.shutdown().await;
    info!(?outcome, retries = stats.retries, "Sync command finished");

    match outcome {
        SyncOutcome::Applied => note_success(&format!("{label} synced")),
        SyncOutcome::Stale => note_info(&format!("{label} unchanged: the gateway holds a newer value")),
        SyncOutcome::Superseded => note_info(&format!("{label} replaced by a newer write")),
        SyncOutcome::Skipped => {
            note_warn("No learner configured (client.userId); progress kept local")
        }
        SyncOutcome::Failed { attempts, error } => {
            note_error(&format!("{label} not synced after {attempts} attempt(s): {error}"));
            bail!("sync failed");
        }
    }
    Ok(())
}

pub(crate) async fn show_progress(config: &VibeStudyConfig, day: u32) -> Result<()> {
    let Some(user) = client::current_user(config) else {
        note_warn("No learner configured (client.userId); nothing to show");
        return Ok(());
    };
    let store = client::remote_store(config)?;
    let progress = store.load_day(&user.id, Day(day)).await?;
    print!("{}", format_progress(&progress));
    Ok(())
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}

/// One line per stored field, then the task table.
fn format_progress(progress: &DayProgress) -> String {
    let preview = |text: &Option<String>| match text {
        Some(text) => {
            let first = text.lines().next().unwrap_or_default();
            if text.lines().count() > 1 {
                format!("{first} …")
            } else {
                first.to_string()
            }
        }
        None => "-".to_string(),
    };

    let mut fields = vec![
        ("day", progress.day.to_string()),
        ("completed", yes_no(progress.completed)),
        ("code", preview(&progress.code)),
        ("notes", preview(&progress.notes)),
        ("recap", preview(&progress.recap_answer)),
        (
            "tasks done",
            format!("{}/{}", progress.completed_task_count(), progress.tasks.len()),
        ),
    ];
    if let Some(at) = progress.completed_at {
        fields.insert(2, ("completed at", at.to_rfc3339()));
    }

    let mut out = render_fields(&fields);
    if !progress.tasks.is_empty() {
        let rows: Vec<Vec<String>> = progress
            .tasks
            .iter()
            .map(|(task, done)| vec![task.clone(), yes_no(*done)])
            .collect();
        out.push('\n');
        out.push_str(&render_table(&["Task", "Done"], &rows));
    }
    out
}
