use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use testpanel_core::{PanelCommand, PanelHandle, PassOutcome, Reconciler, RowOutcome};

/// Spawns the controller task: runs the initial reconciliation pass, then
/// drains panel commands strictly sequentially, publishing a fresh snapshot
/// after every state change. The task exits when every command sender is
/// dropped or every snapshot receiver is gone.
pub fn spawn_controller(mut reconciler: Reconciler) -> (PanelHandle, JoinHandle<()>) {
    let (command_tx, mut command_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(reconciler.snapshot());

    let task = tokio::spawn(async move {
        let outcome = reconciler.initialize().await;
        log_pass_outcome(&outcome);
        if snapshot_tx.send(reconciler.snapshot()).is_err() {
            return;
        }

        while let Some(command) = command_rx.recv().await {
            match command {
                PanelCommand::Refresh => {
                    let outcome = reconciler.reconcile().await;
                    log_pass_outcome(&outcome);
                }
                PanelCommand::Toggle { project, desired } => {
                    match reconciler.toggle(&project, desired).await {
                        Ok(RowOutcome::Applied) => {}
                        Ok(outcome) => {
                            warn!(
                                project = project.as_str(),
                                outcome = ?outcome,
                                "toggle rejected"
                            );
                        }
                        Err(error) => {
                            warn!(
                                project = project.as_str(),
                                error = %error,
                                "toggle failed; row marked for retry"
                            );
                        }
                    }
                }
                PanelCommand::Retry { project } => match reconciler.retry(&project).await {
                    Ok(RowOutcome::Applied) => {
                        info!(project = project.as_str(), "row retry succeeded");
                    }
                    Ok(outcome) => {
                        warn!(
                            project = project.as_str(),
                            outcome = ?outcome,
                            "row retry rejected"
                        );
                    }
                    Err(error) => {
                        warn!(
                            project = project.as_str(),
                            error = %error,
                            "row retry failed"
                        );
                    }
                },
            }

            if snapshot_tx.send(reconciler.snapshot()).is_err() {
                break;
            }
        }
    });

    let handle = PanelHandle {
        commands: command_tx,
        snapshots: snapshot_rx,
    };
    (handle, task)
}

fn log_pass_outcome(outcome: &PassOutcome) {
    match &outcome.tag {
        Ok(tag_id) => info!(tag = tag_id.as_str(), "sentinel tag resolved"),
        Err(error) => warn!(error = %error, "sentinel tag reconciliation failed"),
    }

    match &outcome.issues {
        Ok(report) => {
            if !report.created.is_empty() {
                info!(created = report.created.len(), "created sentinel issues");
            }
            for (project, error) in &report.failed {
                warn!(
                    project = project.as_str(),
                    error = %error,
                    "sentinel issue creation failed"
                );
            }
        }
        Err(error) => warn!(error = %error, "issue reconciliation failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::spawn_controller;
    use std::sync::Arc;
    use testpanel_core::test_support::{RecordingTracker, TrackerOp};
    use testpanel_core::{PanelCommand, PanelPhase, Reconciler, TEST_TAG_NAME};

    #[tokio::test]
    async fn controller_publishes_a_ready_snapshot_after_initialization() {
        let tracker = Arc::new(RecordingTracker::new());
        tracker.put_project("P1", "Alpha", &[]);

        let (mut handle, task) = spawn_controller(Reconciler::new(tracker.clone()));

        handle
            .snapshots
            .changed()
            .await
            .expect("initialization snapshot");
        let snapshot = handle.snapshots.borrow_and_update().clone();
        assert_eq!(snapshot.phase, PanelPhase::Ready);
        assert!(snapshot.tag_resolved);
        assert_eq!(snapshot.rows.len(), 1);
        assert!(!snapshot.rows[0].checked);

        drop(handle);
        task.await.expect("controller task exits cleanly");
    }

    #[tokio::test]
    async fn toggle_command_round_trips_through_the_controller() {
        let tracker = Arc::new(RecordingTracker::new());
        tracker.put_tag("T1", TEST_TAG_NAME);
        tracker.put_project("P1", "Alpha", &[("I1", "Test Run", &[])]);

        let (mut handle, task) = spawn_controller(Reconciler::new(tracker.clone()));
        handle
            .snapshots
            .changed()
            .await
            .expect("initialization snapshot");
        handle.snapshots.borrow_and_update();

        assert!(handle.send(PanelCommand::Toggle {
            project: "P1".into(),
            desired: true,
        }));
        handle.snapshots.changed().await.expect("toggle snapshot");
        let snapshot = handle.snapshots.borrow_and_update().clone();
        assert!(snapshot.rows[0].checked);
        assert_eq!(tracker.calls_of(TrackerOp::AddIssueTag).len(), 1);

        drop(handle);
        task.await.expect("controller task exits cleanly");
    }
}
