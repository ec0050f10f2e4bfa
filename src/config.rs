use crate::catalog::{ReportKind, DEFAULT_REPORTS};
use crate::report_job::{PollStrategy, TimeoutPolicy};
use clap::{Args as ClapArgs, ValueEnum};
use std::path::PathBuf;

const REFRESH_TOKEN_PATH: &str = "./refresh_token/refresh.txt";
const FILE_DIRECTORY: &str = "./ms_ads/files";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Production,
    Sandbox,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct Config {
    #[arg(long, env = "MS_ADS_CLIENT_ID")]
    pub(crate) client_id: String,

    #[arg(long, env = "MS_ADS_DEVELOPER_TOKEN")]
    pub(crate) developer_token: String,

    #[arg(long, value_enum, default_value_t = Environment::Production, env = "MS_ADS_ENVIRONMENT")]
    pub(crate) environment: Environment,

    #[arg(long, default_value = REFRESH_TOKEN_PATH, env = "MS_ADS_REFRESH_TOKEN_PATH")]
    pub(crate) refresh_token_path: PathBuf,

    /// Anti-forgery state sent with the consent request. A random value is used when unset.
    #[arg(long, env = "MS_ADS_CLIENT_STATE")]
    pub(crate) client_state: Option<String>,

    #[arg(long, default_value = FILE_DIRECTORY, env = "MS_ADS_FILE_DIRECTORY")]
    pub(crate) file_directory: PathBuf,

    #[arg(long, env = "MS_ADS_OAUTH_URL")]
    pub(crate) oauth_url: Option<String>,

    #[arg(long, env = "MS_ADS_CUSTOMER_API_URL")]
    pub(crate) customer_api_url: Option<String>,

    #[arg(long, env = "MS_ADS_REPORTING_API_URL")]
    pub(crate) reporting_api_url: Option<String>,

    #[arg(long, value_enum, default_value_t = PollStrategy::Resubmit)]
    pub(crate) poll_strategy: PollStrategy,

    #[arg(long, value_enum, default_value_t = TimeoutPolicy::BestEffort)]
    pub(crate) timeout_policy: TimeoutPolicy,

    /// Reports to extract for every account. Defaults to the standard report set.
    #[arg(long = "report", value_enum)]
    pub(crate) reports: Vec<ReportKind>,

    /// Command handed the staging directory once the output files are written.
    #[arg(long, env = "MS_ADS_UPLOADER_COMMAND")]
    pub(crate) uploader_command: Option<String>,

    #[arg(long)]
    pub(crate) keep_files: bool,
}

impl Config {
    pub fn report_kinds(&self) -> Vec<ReportKind> {
        if self.reports.is_empty() {
            DEFAULT_REPORTS.to_vec()
        } else {
            self.reports.clone()
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config(file_directory: &std::path::Path) -> Config {
    Config {
        client_id: "test_client".to_string(),
        developer_token: "test_developer_token".to_string(),
        environment: Environment::Sandbox,
        refresh_token_path: file_directory.join("refresh.txt"),
        client_state: Some("test_state".to_string()),
        file_directory: file_directory.to_path_buf(),
        oauth_url: None,
        customer_api_url: None,
        reporting_api_url: None,
        poll_strategy: PollStrategy::Resubmit,
        timeout_policy: TimeoutPolicy::BestEffort,
        reports: vec![],
        uploader_command: None,
        keep_files: false,
    }
}
