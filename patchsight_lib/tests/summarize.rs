mod common;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use common::{PROJECT_REPLY, SUMMARY_REPLY, Scripted, fixture};
use patchsight::{completion::Task, manifest::SummaryStatus, project_manager::ProjectStatus};
use pretty_assertions::assert_eq;

/// Fails file summaries for `broken.py` while `failing` is set.
fn flaky(failing: Arc<AtomicBool>) -> Arc<Scripted> {
    Scripted::new(move |task, prompt| match task {
        Task::FileSummary if prompt.contains("broken.py") && failing.load(Ordering::SeqCst) => {
            Err("model overloaded".to_string())
        }
        Task::FileSummary => Ok(SUMMARY_REPLY.to_string()),
        Task::ProjectSummary => Ok(PROJECT_REPLY.to_string()),
        _ => Err("unexpected task".to_string()),
    })
}

#[tokio::test]
async fn full_scan_records_summaries_and_counters() {
    let fx = fixture(
        &[("main.py", "import util\nprint(util.f())\n"), ("util.py", "def f():\n    return 1\n")],
        Scripted::answering("[]", ""),
    );

    let store = fx.app.summarize(None, false).await.unwrap();
    assert_eq!(store.files.len(), 2);
    assert_eq!(store.file_count, 2);
    assert_eq!(store.total_lines, 4);
    assert_eq!(store.project_summary, PROJECT_REPLY);

    let main = &store.files["main.py"];
    assert_eq!(main.concise_summary, "Prints things.");
    assert_eq!(main.detailed_summary, "Reads input and prints it.");
    assert_eq!(main.lines, 2);
    assert!(main.error.is_none());

    let record = fx.app.record().unwrap();
    assert_eq!(record.summary_count, 1);
    assert_eq!(record.file_count, 2);
    assert_eq!(record.status, ProjectStatus::UpToDate);
    assert!(record.last_summarized.is_some());
}

#[tokio::test]
async fn failed_file_is_marked_and_retried_next_pass() {
    let failing = Arc::new(AtomicBool::new(true));
    let fx = fixture(
        &[("broken.py", "x = (\n"), ("good.py", "y = 1\n")],
        flaky(failing.clone()),
    );

    let first = fx.app.summarize(None, false).await.unwrap();
    assert!(first.files["broken.py"].is_error());
    assert!(!first.files["good.py"].is_error());
    assert_eq!(first.project_summary, PROJECT_REPLY);

    failing.store(false, Ordering::SeqCst);
    let second = fx.app.summarize(None, false).await.unwrap();
    assert!(second.files.values().all(|entry| !entry.is_error()));
    // Only the failed file is asked about again.
    assert_eq!(fx.backend.calls(Task::FileSummary), 3);
}

#[tokio::test]
async fn incremental_pass_only_touches_changed_files() {
    let fx = fixture(&[("a.py", "a = 1\n"), ("b.py", "b = 1\n")], Scripted::answering("[]", ""));
    fx.app.summarize(None, false).await.unwrap();

    fx.write("b.py", "b = 2\nc = 3\n");
    let store = fx.app.summarize(None, false).await.unwrap();

    assert_eq!(fx.backend.calls(Task::FileSummary), 3);
    assert_eq!(store.files["b.py"].lines, 2);
    assert_eq!(store.total_lines, 3);
}

#[tokio::test]
async fn status_check_does_not_hide_edits_from_next_summarize() {
    let fx = fixture(&[("a.py", "a = 1\n")], Scripted::answering("[]", ""));
    fx.app.summarize(None, false).await.unwrap();

    fx.write("a.py", "a = 1\nb = 2\n");
    let needs_update = SummaryStatus::NeedsUpdate {
        modified_files: vec!["a.py".to_string()],
    };
    assert_eq!(fx.app.summary_status().unwrap(), needs_update);
    // A second check still sees the edit even though the scan already recorded it.
    assert_eq!(fx.app.summary_status().unwrap(), needs_update);

    let store = fx.app.summarize(None, false).await.unwrap();
    assert_eq!(fx.backend.calls(Task::FileSummary), 2);
    assert_eq!(store.files["a.py"].lines, 2);
    assert_eq!(fx.app.summary_status().unwrap(), SummaryStatus::UpToDate);
}

#[tokio::test]
async fn deleted_file_drops_out_of_summaries() {
    let fx = fixture(&[("a.py", "a = 1\n"), ("b.py", "b = 1\n")], Scripted::answering("[]", ""));
    fx.app.summarize(None, false).await.unwrap();

    std::fs::remove_file(fx.root().join("b.py")).unwrap();
    let store = fx.app.summarize(None, false).await.unwrap();
    assert_eq!(store.files.keys().cloned().collect::<Vec<_>>(), vec!["a.py".to_string()]);
}

#[tokio::test]
async fn project_summary_skipped_without_healthy_files() {
    let backend = Scripted::new(|task, _| match task {
        Task::FileSummary => Err("down".to_string()),
        _ => Ok("should not be asked".to_string()),
    });
    let fx = fixture(&[("a.py", "a = 1\n")], backend);

    let store = fx.app.summarize(None, false).await.unwrap();
    assert!(store.files["a.py"].is_error());
    assert_eq!(store.project_summary, "");
    assert_eq!(fx.backend.calls(Task::ProjectSummary), 0);
}

#[tokio::test]
async fn project_summary_failure_is_appended() {
    let backend = Scripted::new(|task, _| match task {
        Task::FileSummary => Ok(SUMMARY_REPLY.to_string()),
        _ => Err("boom".to_string()),
    });
    let fx = fixture(&[("a.py", "a = 1\n")], backend);

    let store = fx.app.summarize(None, false).await.unwrap();
    assert!(store.project_summary.starts_with("\n\n[Error: "));
    assert!(store.project_summary.contains("boom"));
    assert!(store.project_summary.ends_with(']'));
}

#[tokio::test]
async fn unknown_client_is_rejected() {
    let fx = fixture(&[("a.py", "a = 1\n")], Scripted::answering("[]", ""));
    let err = fx.app.summarize(Some("nope"), false).await.unwrap_err();
    assert!(matches!(err, patchsight::PatchSightError::UnknownClient(ref name) if name == "nope"));
}
