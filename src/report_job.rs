use crate::api_client::{AccountRef, DownloadTarget, JobHandle, ReportingApi};
use crate::catalog::ReportDefinition;
use crate::config::Config;
use crate::error::Error;
use crate::fault;
use clap::ValueEnum;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const MAX_POLL_ATTEMPTS: u32 = 10;
pub const POLL_DELAY: Duration = Duration::from_secs(20);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_millis(3_600_000);

/// How a job is checked for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PollStrategy {
    /// Submits the request again on every attempt and polls the newest job.
    Resubmit,
    /// Submits once and polls the same job on every attempt.
    StatusQuery,
}

/// Outcome of the final download made once every poll attempt came back without a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TimeoutPolicy {
    /// Report the job as timed out without a result file and without an error.
    NoOp,
    /// Fail with [`Error::Timeout`] whatever the final download produced.
    Error,
    /// Keep the file if one materialized, fail with [`Error::Timeout`] otherwise.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    pub file_directory: PathBuf,
    pub poll_strategy: PollStrategy,
    pub timeout_policy: TimeoutPolicy,
    pub max_poll_attempts: u32,
    pub poll_delay: Duration,
    pub download_timeout: Duration,
}

impl JobSettings {
    pub fn new(config: &Config) -> Self {
        JobSettings {
            file_directory: config.file_directory.clone(),
            poll_strategy: config.poll_strategy,
            timeout_policy: config.timeout_policy,
            max_poll_attempts: MAX_POLL_ATTEMPTS,
            poll_delay: POLL_DELAY,
            download_timeout: DOWNLOAD_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Polling,
    Ready,
    Failed,
    TimedOut,
}

/// Tracks one report definition from submission to its result file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub report_name: String,
    pub state: JobState,
    pub download_url: Option<String>,
    pub result_path: Option<PathBuf>,
}

impl DownloadJob {
    /// Moves to `state`, returning false when the job is already there.
    fn transition(&mut self, state: JobState) -> bool {
        if self.state == state {
            return false;
        }
        info!("{}: {:?} -> {:?}", self.report_name, self.state, state);
        self.state = state;
        true
    }
}

pub struct ReportJobRunner {
    reporting: Arc<dyn ReportingApi>,
    settings: JobSettings,
}

impl ReportJobRunner {
    pub fn new(reporting: Arc<dyn ReportingApi>, settings: JobSettings) -> Self {
        ReportJobRunner {
            reporting,
            settings,
        }
    }

    /// Drives `definition` to a downloaded file for `account`.
    ///
    /// Submission and download errors end the run. Poll errors only use up an attempt.
    /// Remote faults are decoded into [`Error::RemoteStructuredFault`] or
    /// [`Error::RemoteSerializationFault`], other failures become [`Error::OpaqueFailure`].
    pub async fn run(
        &self,
        access_token: &str,
        account: &AccountRef,
        definition: &ReportDefinition,
    ) -> Result<DownloadJob, Error> {
        let mut job = DownloadJob {
            report_name: definition.report_name.clone(),
            state: JobState::Submitted,
            download_url: None,
            result_path: None,
        };

        match self.drive(&mut job, access_token, account, definition).await {
            Ok(()) => Ok(job),
            Err(err) => {
                job.transition(JobState::Failed);
                Err(surface(err))
            }
        }
    }

    async fn drive(
        &self,
        job: &mut DownloadJob,
        access_token: &str,
        account: &AccountRef,
        definition: &ReportDefinition,
    ) -> Result<(), Error> {
        let target = DownloadTarget {
            directory: self.settings.file_directory.clone(),
            file_name: definition.result_file_name(account.id),
            decompress: true,
            overwrite: true,
            timeout: self.settings.download_timeout,
        };
        info!("awaiting submit and download of {}", target.file_name);

        let mut handle = self
            .reporting
            .submit(access_token, account, definition)
            .await?;

        for attempt in 1..=self.settings.max_poll_attempts {
            if attempt > 1 && self.settings.poll_strategy == PollStrategy::Resubmit {
                handle = self
                    .reporting
                    .submit(access_token, account, definition)
                    .await?;
            }
            job.transition(JobState::Polling);

            tokio::time::sleep(self.settings.poll_delay).await;

            match self.reporting.poll(access_token, &handle).await {
                Ok(status) => {
                    info!(
                        "{} attempt {}: status {}, download url {:?}",
                        job.report_name, attempt, status.status, status.download_url
                    );
                    if status.download_url.is_some() {
                        handle.download_url = status.download_url;
                        break;
                    }
                }
                Err(err) => warn!(
                    "{} attempt {}: poll failed: {}",
                    job.report_name,
                    attempt,
                    surface(err)
                ),
            }
        }

        job.download_url = handle.download_url.clone();

        if handle.download_url.is_some() {
            job.transition(JobState::Ready);
            let path = self
                .reporting
                .download(access_token, &handle, &target)
                .await?
                .ok_or_else(|| Error::NoData {
                    message: format!("{} has a download URL but no result", job.report_name),
                })?;
            job.result_path = Some(path);
            return Ok(());
        }

        job.transition(JobState::TimedOut);
        self.finish_timed_out(job, access_token, &handle, &target)
            .await
    }

    async fn finish_timed_out(
        &self,
        job: &mut DownloadJob,
        access_token: &str,
        handle: &JobHandle,
        target: &DownloadTarget,
    ) -> Result<(), Error> {
        let attempts = self.settings.max_poll_attempts;
        warn!(
            "{} not ready after {} attempts, attempting a final download",
            job.report_name, attempts
        );

        let downloaded = self.reporting.download(access_token, handle, target).await;

        match self.settings.timeout_policy {
            TimeoutPolicy::NoOp => {
                if let Err(err) = downloaded {
                    warn!("{}: final download failed: {}", job.report_name, surface(err));
                }
                Ok(())
            }
            TimeoutPolicy::Error => {
                if let Err(err) = downloaded {
                    error!("{}: final download failed: {}", job.report_name, surface(err));
                }
                Err(Error::Timeout { attempts })
            }
            TimeoutPolicy::BestEffort => match downloaded? {
                Some(path) => {
                    job.result_path = Some(path);
                    Ok(())
                }
                None => Err(Error::Timeout { attempts }),
            },
        }
    }
}

/// Maps a failure to what the caller sees: remote faults decoded, everything
/// unexpected reduced to its message.
fn surface(err: Error) -> Error {
    match err {
        Error::RemoteFault { detail, .. } => match fault::decode(&detail) {
            Ok(decoded) => decoded.into(),
            Err(unknown) => unknown,
        },
        err @ (Error::Timeout { .. }
        | Error::RemoteStructuredFault { .. }
        | Error::RemoteSerializationFault { .. }
        | Error::UnknownFault { .. }
        | Error::OpaqueFailure { .. }) => err,
        other => Error::OpaqueFailure {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::{MockReportingApi, ReportStatus};
    use crate::catalog::{DateRange, ReportKind};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn account() -> AccountRef {
        AccountRef {
            id: 123,
            name: "Acme".to_string(),
            parent_customer_id: 9,
        }
    }

    fn definition() -> ReportDefinition {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 2, 14).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(),
        );
        ReportKind::CampaignPerformance.definition(123, &range)
    }

    fn settings(dir: &TempDir, strategy: PollStrategy, policy: TimeoutPolicy) -> JobSettings {
        JobSettings {
            file_directory: dir.path().to_path_buf(),
            poll_strategy: strategy,
            timeout_policy: policy,
            max_poll_attempts: MAX_POLL_ATTEMPTS,
            poll_delay: Duration::ZERO,
            download_timeout: DOWNLOAD_TIMEOUT,
        }
    }

    fn handle(n: u32) -> JobHandle {
        JobHandle {
            request_id: format!("request-{}", n),
            account_id: 123,
            customer_id: 9,
            download_url: None,
        }
    }

    fn pending() -> ReportStatus {
        ReportStatus {
            status: "Pending".to_string(),
            download_url: None,
        }
    }

    fn ready() -> ReportStatus {
        ReportStatus {
            status: "Success".to_string(),
            download_url: Some("https://download.example.com/report.zip".to_string()),
        }
    }

    /// Counts submissions and hands out sequential handles.
    fn expect_submissions(reporting: &mut MockReportingApi, times: usize) -> Arc<AtomicU32> {
        let submissions = Arc::new(AtomicU32::new(0));
        let counter = submissions.clone();
        reporting
            .expect_submit()
            .times(times)
            .returning(move |_, _, _| Ok(handle(counter.fetch_add(1, Ordering::SeqCst) + 1)));
        submissions
    }

    fn expect_statuses(reporting: &mut MockReportingApi, statuses: Vec<ReportStatus>) {
        let mut remaining = statuses.into_iter();
        reporting
            .expect_poll()
            .returning(move |_, _| Ok(remaining.next().unwrap_or_else(pending)));
    }

    #[test]
    fn test_transition_only_on_state_change() {
        let mut job = DownloadJob {
            report_name: "campaign_performance_report".to_string(),
            state: JobState::Submitted,
            download_url: None,
            result_path: None,
        };

        assert!(job.transition(JobState::Polling));
        assert!(!job.transition(JobState::Polling));
        assert_eq!(job.state, JobState::Polling);
        assert!(job.transition(JobState::Ready));
    }

    #[tokio::test]
    async fn test_resubmits_until_download_url() {
        let temp_dir = TempDir::new().unwrap();
        let expected_path = temp_dir.path().join("123_campaign_performance_report_input.csv");

        let mut reporting = MockReportingApi::new();
        let submissions = expect_submissions(&mut reporting, 3);
        expect_statuses(&mut reporting, vec![pending(), pending(), ready()]);
        let returned_path = expected_path.clone();
        reporting
            .expect_download()
            .withf(|_, handle, target| {
                handle.request_id == "request-3"
                    && handle.download_url.is_some()
                    && target.file_name == "123_campaign_performance_report_input.csv"
                    && target.decompress
                    && target.overwrite
                    && target.timeout == DOWNLOAD_TIMEOUT
            })
            .times(1)
            .returning(move |_, _, _| Ok(Some(returned_path.clone())));

        let runner = ReportJobRunner::new(
            Arc::new(reporting),
            settings(&temp_dir, PollStrategy::Resubmit, TimeoutPolicy::BestEffort),
        );

        let job = runner.run("token", &account(), &definition()).await.unwrap();

        assert_eq!(submissions.load(Ordering::SeqCst), 3);
        assert_eq!(job.state, JobState::Ready);
        assert_eq!(job.result_path, Some(expected_path));
        assert!(job.download_url.is_some());
    }

    #[tokio::test]
    async fn test_status_query_submits_once() {
        let temp_dir = TempDir::new().unwrap();

        let mut reporting = MockReportingApi::new();
        expect_submissions(&mut reporting, 1);
        reporting
            .expect_poll()
            .withf(|_, handle| handle.request_id == "request-1")
            .times(3)
            .returning({
                let mut calls = 0;
                move |_, _| {
                    calls += 1;
                    Ok(if calls < 3 { pending() } else { ready() })
                }
            });
        reporting
            .expect_download()
            .times(1)
            .returning(|_, _, _| Ok(Some(PathBuf::from("report.csv"))));

        let runner = ReportJobRunner::new(
            Arc::new(reporting),
            settings(&temp_dir, PollStrategy::StatusQuery, TimeoutPolicy::BestEffort),
        );

        let job = runner.run("token", &account(), &definition()).await.unwrap();
        assert_eq!(job.state, JobState::Ready);
    }

    #[tokio::test]
    async fn test_exhausted_polls_make_one_final_download() {
        let temp_dir = TempDir::new().unwrap();

        let mut reporting = MockReportingApi::new();
        let submissions = expect_submissions(&mut reporting, 10);
        expect_statuses(&mut reporting, vec![]);
        reporting
            .expect_download()
            .withf(|_, handle, _| handle.request_id == "request-10" && handle.download_url.is_none())
            .times(1)
            .returning(|_, _, _| Ok(None));

        let runner = ReportJobRunner::new(
            Arc::new(reporting),
            settings(&temp_dir, PollStrategy::Resubmit, TimeoutPolicy::BestEffort),
        );

        let result = runner.run("token", &account(), &definition()).await;

        assert_eq!(submissions.load(Ordering::SeqCst), 10);
        assert!(matches!(result.unwrap_err(), Error::Timeout { attempts: 10 }));
    }

    #[tokio::test]
    async fn test_timeout_best_effort_keeps_late_file() {
        let temp_dir = TempDir::new().unwrap();

        let mut reporting = MockReportingApi::new();
        expect_submissions(&mut reporting, 10);
        expect_statuses(&mut reporting, vec![]);
        reporting
            .expect_download()
            .times(1)
            .returning(|_, _, _| Ok(Some(PathBuf::from("late.csv"))));

        let runner = ReportJobRunner::new(
            Arc::new(reporting),
            settings(&temp_dir, PollStrategy::Resubmit, TimeoutPolicy::BestEffort),
        );

        let job = runner.run("token", &account(), &definition()).await.unwrap();

        assert_eq!(job.state, JobState::TimedOut);
        assert_eq!(job.result_path, Some(PathBuf::from("late.csv")));
    }

    #[tokio::test]
    async fn test_timeout_no_op() {
        let temp_dir = TempDir::new().unwrap();

        let mut reporting = MockReportingApi::new();
        expect_submissions(&mut reporting, 10);
        expect_statuses(&mut reporting, vec![]);
        reporting
            .expect_download()
            .times(1)
            .returning(|_, _, _| Err(Error::RemoteFault { status: 500, detail: json!({}) }));

        let runner = ReportJobRunner::new(
            Arc::new(reporting),
            settings(&temp_dir, PollStrategy::Resubmit, TimeoutPolicy::NoOp),
        );

        let job = runner.run("token", &account(), &definition()).await.unwrap();

        assert_eq!(job.state, JobState::TimedOut);
        assert_eq!(job.result_path, None);
    }

    #[tokio::test]
    async fn test_timeout_error_even_with_file() {
        let temp_dir = TempDir::new().unwrap();

        let mut reporting = MockReportingApi::new();
        expect_submissions(&mut reporting, 10);
        expect_statuses(&mut reporting, vec![]);
        reporting
            .expect_download()
            .times(1)
            .returning(|_, _, _| Ok(Some(PathBuf::from("late.csv"))));

        let runner = ReportJobRunner::new(
            Arc::new(reporting),
            settings(&temp_dir, PollStrategy::Resubmit, TimeoutPolicy::Error),
        );

        let result = runner.run("token", &account(), &definition()).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout { attempts: 10 }));
    }

    #[tokio::test]
    async fn test_poll_failures_are_retried() {
        let temp_dir = TempDir::new().unwrap();

        let mut reporting = MockReportingApi::new();
        expect_submissions(&mut reporting, 2);
        reporting.expect_poll().times(2).returning({
            let mut calls = 0;
            move |_, _| {
                calls += 1;
                if calls == 1 {
                    Err(Error::OpaqueFailure {
                        message: "connection reset".to_string(),
                    })
                } else {
                    Ok(ready())
                }
            }
        });
        reporting
            .expect_download()
            .times(1)
            .returning(|_, _, _| Ok(Some(PathBuf::from("report.csv"))));

        let runner = ReportJobRunner::new(
            Arc::new(reporting),
            settings(&temp_dir, PollStrategy::Resubmit, TimeoutPolicy::BestEffort),
        );

        let job = runner.run("token", &account(), &definition()).await.unwrap();
        assert_eq!(job.state, JobState::Ready);
    }

    #[tokio::test]
    async fn test_submission_fault_is_decoded_and_not_retried() {
        let temp_dir = TempDir::new().unwrap();

        let mut reporting = MockReportingApi::new();
        reporting.expect_submit().times(1).returning(|_, _, _| {
            Err(Error::RemoteFault {
                status: 400,
                detail: json!({
                    "AdApiFaultDetail": {
                        "Errors": { "AdApiError": [{ "Code": 105, "Message": "Invalid credentials" }] }
                    }
                }),
            })
        });
        reporting.expect_poll().never();
        reporting.expect_download().never();

        let runner = ReportJobRunner::new(
            Arc::new(reporting),
            settings(&temp_dir, PollStrategy::Resubmit, TimeoutPolicy::BestEffort),
        );

        let result = runner.run("token", &account(), &definition()).await;

        let Err(Error::RemoteStructuredFault { records }) = result else {
            panic!("Expected a structured fault");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code.as_deref(), Some("105"));
    }

    #[tokio::test]
    async fn test_unrecognized_fault_is_reported_as_unknown() {
        let temp_dir = TempDir::new().unwrap();

        let mut reporting = MockReportingApi::new();
        reporting.expect_submit().returning(|_, _, _| {
            Err(Error::RemoteFault {
                status: 503,
                detail: json!("Service Unavailable"),
            })
        });

        let runner = ReportJobRunner::new(
            Arc::new(reporting),
            settings(&temp_dir, PollStrategy::Resubmit, TimeoutPolicy::BestEffort),
        );

        let result = runner.run("token", &account(), &definition()).await;
        assert!(matches!(result.unwrap_err(), Error::UnknownFault { .. }));
    }

    #[tokio::test]
    async fn test_download_failure_is_opaque() {
        let temp_dir = TempDir::new().unwrap();

        let mut reporting = MockReportingApi::new();
        expect_submissions(&mut reporting, 1);
        expect_statuses(&mut reporting, vec![ready()]);
        reporting.expect_download().times(1).returning(|_, _, _| {
            Err(Error::DownloadTimedOut {
                timeout_ms: 3_600_000,
            })
        });

        let runner = ReportJobRunner::new(
            Arc::new(reporting),
            settings(&temp_dir, PollStrategy::Resubmit, TimeoutPolicy::BestEffort),
        );

        let result = runner.run("token", &account(), &definition()).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::OpaqueFailure { message } if message.contains("3600000 ms")
        ));
    }
}
