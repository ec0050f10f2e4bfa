use crate::error::Error;
use log::info;
use std::path::Path;
use tokio::process::Command;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Uploader: Send + Sync + 'static {
    /// Loads every staged output file in `directory` into the warehouse.
    ///
    /// # Arguments
    /// * `directory` - The staging directory holding the `*_output.csv` files.
    ///
    /// # Returns
    /// A Result containing either `()` or an Error.
    async fn execute_uploader(&self, directory: &Path) -> Result<(), Error>;
}

/// Hands the staging directory to an external bulk loader command.
#[derive(Clone, Debug)]
pub struct CommandUploader {
    program: String,
    args: Vec<String>,
}

impl CommandUploader {
    /// Splits a command line such as `bq-loader --dataset ads` into program and arguments.
    pub fn new(command: &str) -> Result<Self, Error> {
        let mut parts = command.split_whitespace().map(str::to_string);

        let program = parts.next().ok_or_else(|| Error::UploadFailed {
            status: "no uploader command configured".to_string(),
        })?;

        Ok(CommandUploader {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait::async_trait]
impl Uploader for CommandUploader {
    async fn execute_uploader(&self, directory: &Path) -> Result<(), Error> {
        info!("uploading {} with {}", directory.display(), self.program);

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(directory)
            .status()
            .await?;

        if !status.success() {
            return Err(Error::UploadFailed {
                status: status.to_string(),
            });
        }

        Ok(())
    }
}
