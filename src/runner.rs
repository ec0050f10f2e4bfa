use crate::api_client::{AccountRef, ApiClient};
use crate::auth::{AuthSession, TerminalConsentPrompt};
use crate::catalog::{self, DateRange, ReportKind};
use crate::config::Config;
use crate::error::Error;
use crate::postprocess;
use crate::report_job::{DownloadJob, JobSettings, ReportJobRunner};
use crate::token_store::FileTokenStore;
use crate::uploader::{CommandUploader, Uploader};
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;

/// Result of one report definition for one account.
#[derive(Debug)]
pub struct ReportOutcome {
    pub account_id: i64,
    pub report_name: String,
    pub result: Result<DownloadJob, Error>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ReportOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

pub async fn extract_and_load(
    config: Config,
    days_back: u32,
    days_skip: u32,
) -> Result<BatchReport, Error> {
    let date_range = catalog::get_custom_dates(days_back, days_skip)?;
    info!("extracting reports from {} to {}", date_range.start, date_range.end);

    let api_client = Arc::new(ApiClient::new(&config));
    let mut session = AuthSession::new(
        &config,
        api_client.clone(),
        api_client.clone(),
        Arc::new(TerminalConsentPrompt),
        Arc::new(FileTokenStore::new(&config)),
    );

    let accounts = session.authenticate().await?;
    if accounts.is_empty() {
        return Err(Error::NoData {
            message: "No accounts found for processing".to_string(),
        });
    }

    let jobs = ReportJobRunner::new(api_client, JobSettings::new(&config));
    let batch = run_reports(
        &mut session,
        &jobs,
        &accounts,
        &config.report_kinds(),
        &date_range,
    )
    .await;

    info!(
        "{} report(s) downloaded, {} failed",
        batch.succeeded(),
        batch.failed()
    );

    let uploader = match &config.uploader_command {
        Some(command) => Some(CommandUploader::new(command)?),
        None => None,
    };

    stage_and_upload(
        &config.file_directory,
        uploader.as_ref().map(|u| u as &dyn Uploader),
        config.keep_files,
    )
    .await?;

    Ok(batch)
}

/// Runs every report kind for every account, one at a time.
///
/// A failing report is recorded and the batch moves on to the next one.
pub async fn run_reports(
    session: &mut AuthSession,
    jobs: &ReportJobRunner,
    accounts: &[AccountRef],
    kinds: &[ReportKind],
    date_range: &DateRange,
) -> BatchReport {
    let mut batch = BatchReport::default();

    for account in accounts {
        info!("processing account {} ({})", account.id, account.name);

        for kind in kinds {
            let definition = kind.definition(account.id, date_range);

            let result = match session.access_token().await {
                Ok(access_token) => jobs.run(&access_token, account, &definition).await,
                Err(err) => Err(err),
            };

            if let Err(err) = &result {
                error!(
                    "report {} for account {} failed: {}",
                    definition.report_name, account.id, err
                );
            }

            batch.outcomes.push(ReportOutcome {
                account_id: account.id,
                report_name: definition.report_name,
                result,
            });
        }
    }

    batch
}

/// Adds the ingestion timestamp to the downloaded reports, hands them to the uploader
/// and clears the staging directory once the upload went through.
pub async fn stage_and_upload(
    directory: &Path,
    uploader: Option<&dyn Uploader>,
    keep_files: bool,
) -> Result<(), Error> {
    if !directory.exists() {
        warn!("{} does not exist, nothing to stage", directory.display());
        return Ok(());
    }

    let insert_time = postprocess::insert_time_now();
    let staged = postprocess::append_insert_time(directory, &insert_time).await?;
    info!("{} file(s) staged with insert time {}", staged.len(), insert_time);

    match uploader {
        Some(uploader) => uploader.execute_uploader(directory).await?,
        None => info!("no uploader configured, skipping upload"),
    }

    if !keep_files {
        let removed = postprocess::remove_staged_files(directory)?;
        info!("removed {} file(s) from {}", removed, directory.display());
    }

    Ok(())
}
