use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::video::export_planner::ExportPlan;
use crate::video::ffmpeg_manager::{TranscodeStatus, Transcoder};

/// Terminal outcome of one export commit.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Success(PathBuf),
    Failure(String),
}

#[derive(Debug, Clone)]
pub struct ExportReport {
    pub job_id: Uuid,
    pub plan: ExportPlan,
    pub outcome: ExportOutcome,
}

/// Runs one plan to completion on the calling thread.
pub fn execute_plan(plan: &ExportPlan, transcoder: &dyn Transcoder, transcoder_path: &Path) -> ExportOutcome {
    if let Some(parent) = plan.output_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return ExportOutcome::Failure(format!(
                "Failed to create output directory {}: {}",
                parent.display(),
                e
            ));
        }
    }

    log::info!(
        "IN: {:.3}s, OUT: {:.3}s, Duration: {:.3}s",
        plan.in_seconds,
        plan.out_seconds,
        plan.duration()
    );

    match transcoder.run(&plan.invocation(transcoder_path)) {
        TranscodeStatus::Success => ExportOutcome::Success(plan.output_path.clone()),
        TranscodeStatus::Failure(diagnostic) => ExportOutcome::Failure(diagnostic),
    }
}

fn send_report(plan: ExportPlan, outcome: ExportOutcome, result_tx: &mpsc::UnboundedSender<ExportReport>) {
    match &outcome {
        ExportOutcome::Success(path) => log::info!("Exported: {}", path.display()),
        ExportOutcome::Failure(text) => log::error!("Export {} failed:\n{}", plan.job_id, text),
    }

    let report = ExportReport {
        job_id: plan.job_id,
        plan,
        outcome,
    };
    if let Err(e) = result_tx.send(report) {
        log::error!("Failed to send export result: {}", e);
    }
}

fn run_and_report(
    plan: ExportPlan,
    transcoder: &dyn Transcoder,
    transcoder_path: &Path,
    result_tx: &mpsc::UnboundedSender<ExportReport>,
) {
    let outcome = execute_plan(&plan, transcoder, transcoder_path);
    send_report(plan, outcome, result_tx);
}

/// Executes committed export plans away from the caller's thread. Each
/// commit produces exactly one `ExportReport`, even when the export task
/// panics or the worker is gone.
pub struct ExportRunner {
    request_sender: mpsc::UnboundedSender<ExportPlan>,
    result_sender: mpsc::UnboundedSender<ExportReport>,
    result_receiver: Arc<Mutex<mpsc::UnboundedReceiver<ExportReport>>>,
    in_flight: Arc<Mutex<Vec<Uuid>>>,
}

impl ExportRunner {
    pub fn new(transcoder: Arc<dyn Transcoder>, transcoder_path: PathBuf) -> Self {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<ExportPlan>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<ExportReport>();
        let worker_result_tx = result_tx.clone();

        thread::spawn(move || match tokio::runtime::Runtime::new() {
            Ok(rt) => rt.block_on(async move {
                while let Some(plan) = request_rx.recv().await {
                    let transcoder = transcoder.clone();
                    let transcoder_path = transcoder_path.clone();
                    let result_tx = worker_result_tx.clone();
                    tokio::spawn(async move {
                        let aborted_plan = plan.clone();
                        let task_tx = result_tx.clone();
                        let task = tokio::task::spawn_blocking(move || {
                            run_and_report(plan, transcoder.as_ref(), &transcoder_path, &task_tx)
                        });
                        if let Err(e) = task.await {
                            send_report(
                                aborted_plan,
                                ExportOutcome::Failure(format!("Export task aborted: {}", e)),
                                &result_tx,
                            );
                        }
                    });
                }
            }),
            Err(e) => {
                log::error!("Failed to create export runtime ({}), exporting sequentially", e);
                while let Some(plan) = request_rx.blocking_recv() {
                    let aborted_plan = plan.clone();
                    let run = panic::catch_unwind(AssertUnwindSafe(|| {
                        run_and_report(plan, transcoder.as_ref(), &transcoder_path, &worker_result_tx)
                    }));
                    if run.is_err() {
                        send_report(
                            aborted_plan,
                            ExportOutcome::Failure("Export task panicked".to_string()),
                            &worker_result_tx,
                        );
                    }
                }
            }
        });

        Self {
            request_sender: request_tx,
            result_sender: result_tx,
            result_receiver: Arc::new(Mutex::new(result_rx)),
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues `plan` for execution (non-blocking) and returns its job id.
    pub fn commit(&self, plan: ExportPlan) -> Uuid {
        let job_id = plan.job_id;
        log::info!("Exporting {} -> {}", plan.source_path.display(), plan.output_path.display());

        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.push(job_id);
        }
        if let Err(mpsc::error::SendError(plan)) = self.request_sender.send(plan) {
            send_report(
                plan,
                ExportOutcome::Failure("Export worker is not running".to_string()),
                &self.result_sender,
            );
        }
        job_id
    }

    /// Completed exports since the last call (non-blocking).
    pub fn get_completed_results(&self) -> Vec<ExportReport> {
        let mut results = Vec::new();

        if let Ok(mut receiver) = self.result_receiver.lock() {
            while let Ok(result) = receiver.try_recv() {
                results.push(result);
            }
        }

        if !results.is_empty() {
            if let Ok(mut in_flight) = self.in_flight.lock() {
                in_flight.retain(|id| !results.iter().any(|r| r.job_id == *id));
            }
        }

        results
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.lock().map(|ids| !ids.is_empty()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::export_planner::{ExportJob, ExportPlanner, PlanOutcome, ResolutionProfile};
    use crate::video::export_planner::TranscodeInvocation;
    use std::time::{Duration, Instant};

    struct ScriptedTranscoder {
        status: TranscodeStatus,
        seen: Mutex<Vec<TranscodeInvocation>>,
    }

    impl Transcoder for ScriptedTranscoder {
        fn run(&self, invocation: &TranscodeInvocation) -> TranscodeStatus {
            self.seen.lock().unwrap().push(invocation.clone());
            self.status.clone()
        }
    }

    fn plan(output_dir: &Path) -> ExportPlan {
        let job = ExportJob {
            source_path: Some(PathBuf::from("/segments/segment_001.mp4")),
            in_seconds: 1.0,
            out_seconds: 4.0,
            profile: ResolutionProfile::Vga640,
            output_name: "clip_01".to_string(),
        };
        match ExportPlanner::new(output_dir).plan(&job).unwrap() {
            PlanOutcome::Ready(plan) => plan,
            PlanOutcome::NeedsConfirmation(_) => unreachable!(),
        }
    }

    fn wait_for_report(runner: &ExportRunner) -> Vec<ExportReport> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let results = runner.get_completed_results();
            if !results.is_empty() || Instant::now() > deadline {
                return results;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_execute_plan_success() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(&dir.path().join("out"));
        let transcoder = ScriptedTranscoder { status: TranscodeStatus::Success, seen: Mutex::new(Vec::new()) };

        let outcome = execute_plan(&plan, &transcoder, Path::new("ffmpeg"));
        assert_eq!(outcome, ExportOutcome::Success(plan.output_path.clone()));
        assert!(dir.path().join("out").is_dir());
        assert_eq!(transcoder.seen.lock().unwrap()[0].program, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_commit_reports_exactly_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(ScriptedTranscoder {
            status: TranscodeStatus::Failure("Invalid data found when processing input".to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let runner = ExportRunner::new(transcoder, PathBuf::from("ffmpeg"));

        let job_id = runner.commit(plan(dir.path()));
        assert!(runner.is_busy());

        let results = wait_for_report(&runner);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].job_id, job_id);
        assert_eq!(
            results[0].outcome,
            ExportOutcome::Failure("Invalid data found when processing input".to_string())
        );
        assert!(!runner.is_busy());

        thread::sleep(Duration::from_millis(50));
        assert!(runner.get_completed_results().is_empty());
    }

    struct PanickingTranscoder;

    impl Transcoder for PanickingTranscoder {
        fn run(&self, _invocation: &TranscodeInvocation) -> TranscodeStatus {
            panic!("transcoder crashed");
        }
    }

    #[test]
    fn test_panicking_export_still_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ExportRunner::new(Arc::new(PanickingTranscoder), PathBuf::from("ffmpeg"));

        let job_id = runner.commit(plan(dir.path()));
        let results = wait_for_report(&runner);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].job_id, job_id);
        assert!(matches!(results[0].outcome, ExportOutcome::Failure(_)));
        assert!(!runner.is_busy());
    }

    #[test]
    fn test_commit_without_worker_reports_failure() {
        let (request_sender, request_rx) = mpsc::unbounded_channel();
        drop(request_rx);
        let (result_sender, result_rx) = mpsc::unbounded_channel();
        let runner = ExportRunner {
            request_sender,
            result_sender,
            result_receiver: Arc::new(Mutex::new(result_rx)),
            in_flight: Arc::new(Mutex::new(Vec::new())),
        };

        let dir = tempfile::tempdir().unwrap();
        let job_id = runner.commit(plan(dir.path()));
        let results = runner.get_completed_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].job_id, job_id);
        assert_eq!(
            results[0].outcome,
            ExportOutcome::Failure("Export worker is not running".to_string())
        );
        assert!(!runner.is_busy());
    }
}
