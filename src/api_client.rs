use crate::catalog::ReportDefinition;
use crate::config::{Config, Environment};
use crate::error::Error;
use log::{debug, info};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait IdentityApi: Send + Sync + 'static {
    /// Builds the consent URL the user opens in a browser.
    fn authorization_url(&self, state: &str) -> Result<Url, Error>;

    /// Exchanges a refresh token for a new access token.
    /// Rejected grants surface as [`Error::OAuthTokenRequest`].
    async fn request_tokens_by_refresh_token(&self, refresh_token: &str)
        -> Result<OAuthTokens, Error>;

    /// Exchanges the authorization code from the consent redirect for tokens.
    async fn request_tokens_by_code(&self, code: &str) -> Result<OAuthTokens, Error>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CustomerApi: Send + Sync + 'static {
    /// Resolves the id of the user the access token belongs to.
    async fn get_current_user_id(&self, access_token: &str) -> Result<i64, Error>;

    /// Fetches one page of the advertiser accounts visible to `user_id`.
    /// # Returns
    /// `None` when the service returns no account collection at all.
    async fn search_accounts(
        &self,
        access_token: &str,
        user_id: i64,
        page: PageInfo,
    ) -> Result<Option<Vec<AccountRef>>, Error>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ReportingApi: Send + Sync + 'static {
    /// Submits a report request and returns the handle of the queued job.
    async fn submit(
        &self,
        access_token: &str,
        account: &AccountRef,
        definition: &ReportDefinition,
    ) -> Result<JobHandle, Error>;

    /// Queries the status of a submitted job.
    async fn poll(&self, access_token: &str, handle: &JobHandle) -> Result<ReportStatus, Error>;

    /// Downloads the result of a job into `target`.
    ///
    /// Uses the download URL already on the handle, or queries the status once when there is
    /// none. Returns `None` when the job still has no result to download.
    async fn download(
        &self,
        access_token: &str,
        handle: &JobHandle,
        target: &DownloadTarget,
    ) -> Result<Option<PathBuf>, Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRef {
    pub id: i64,
    pub name: String,
    pub parent_customer_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PageInfo {
    pub index: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub request_id: String,
    pub account_id: i64,
    pub customer_id: i64,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportStatus {
    pub status: String,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub directory: PathBuf,
    pub file_name: String,
    pub decompress: bool,
    pub overwrite: bool,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct User {
    #[serde(rename = "Id", deserialize_with = "de_id")]
    id: i64,
}

#[derive(Deserialize)]
struct GetUserResponse {
    #[serde(rename = "User")]
    user: User,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Account {
    #[serde(deserialize_with = "de_id")]
    id: i64,
    name: String,
    #[serde(deserialize_with = "de_id")]
    parent_customer_id: i64,
}

#[derive(Deserialize)]
struct SearchAccountsResponse {
    #[serde(rename = "Accounts")]
    accounts: Option<Vec<Account>>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(rename = "ReportRequestId")]
    report_request_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReportRequestStatus {
    status: String,
    report_download_url: Option<String>,
}

#[derive(Deserialize)]
struct PollResponse {
    #[serde(rename = "ReportRequestStatus")]
    report_request_status: ReportRequestStatus,
}

/// Ids come back as JSON numbers from some operations and as strings from others.
fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(i64),
        Text(String),
    }

    match Id::deserialize(deserializer)? {
        Id::Number(id) => Ok(id),
        Id::Text(id) => id.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoints {
    oauth: String,
    redirect_uri: String,
    scope: String,
    customer: String,
    reporting: String,
}

impl Endpoints {
    fn new(config: &Config) -> Self {
        let (oauth, redirect_uri, scope, customer, reporting) = match config.environment {
            Environment::Production => (
                "https://login.microsoftonline.com/common/oauth2/v2.0",
                "https://login.microsoftonline.com/common/oauth2/nativeclient",
                "https://ads.microsoft.com/msads.manage offline_access",
                "https://clientcenter.api.bingads.microsoft.com/CustomerManagement/v13",
                "https://reporting.api.bingads.microsoft.com/Reporting/v13",
            ),
            Environment::Sandbox => (
                "https://login.windows-ppe.net/consumers/oauth2/v2.0",
                "https://login.windows-ppe.net/common/oauth2/nativeclient",
                "https://api.ads.microsoft.com/msads.manage offline_access",
                "https://clientcenter.api.sandbox.bingads.microsoft.com/CustomerManagement/v13",
                "https://reporting.api.sandbox.bingads.microsoft.com/Reporting/v13",
            ),
        };

        Endpoints {
            oauth: config.oauth_url.clone().unwrap_or_else(|| oauth.to_string()),
            redirect_uri: redirect_uri.to_string(),
            scope: scope.to_string(),
            customer: config
                .customer_api_url
                .clone()
                .unwrap_or_else(|| customer.to_string()),
            reporting: config
                .reporting_api_url
                .clone()
                .unwrap_or_else(|| reporting.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    endpoints: Endpoints,
    client_id: String,
    developer_token: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> Self {
        ApiClient {
            client: Client::new(),
            endpoints: Endpoints::new(config),
            client_id: config.client_id.to_string(),
            developer_token: config.developer_token.to_string(),
        }
    }

    async fn request_tokens(&self, params: &[(&str, &str)]) -> Result<OAuthTokens, Error> {
        let url = format!("{}/token", self.endpoints.oauth);

        let resp = self.client.post(&url).form(params).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let rejection = serde_json::from_str::<OAuthErrorResponse>(&body).unwrap_or(
                OAuthErrorResponse {
                    error: status.to_string(),
                    error_description: Some(body),
                },
            );
            return Err(Error::OAuthTokenRequest {
                error: rejection.error,
                description: rejection.error_description.unwrap_or_default(),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
        account: Option<(i64, i64)>,
        body: &Value,
    ) -> Result<T, Error> {
        let mut request = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .header("DeveloperToken", &self.developer_token)
            .json(body);

        if let Some((customer_id, account_id)) = account {
            request = request
                .header("CustomerId", customer_id.to_string())
                .header("CustomerAccountId", account_id.to_string());
        }

        let resp = request.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await?;
            debug!("{} responded with {}: {}", url, status, body);
            return Err(Error::RemoteFault {
                status: status.as_u16(),
                detail: fault_detail_from_body(&body),
            });
        }

        Ok(resp.json::<T>().await?)
    }
}

#[async_trait::async_trait]
impl IdentityApi for ApiClient {
    fn authorization_url(&self, state: &str) -> Result<Url, Error> {
        let mut url = Url::parse(&format!("{}/authorize", self.endpoints.oauth))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.endpoints.redirect_uri)
            .append_pair("scope", &self.endpoints.scope)
            .append_pair("state", state);

        Ok(url)
    }

    async fn request_tokens_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<OAuthTokens, Error> {
        self.request_tokens(&[
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", self.endpoints.scope.as_str()),
        ])
        .await
    }

    async fn request_tokens_by_code(&self, code: &str) -> Result<OAuthTokens, Error> {
        self.request_tokens(&[
            ("client_id", self.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.endpoints.redirect_uri.as_str()),
            ("scope", self.endpoints.scope.as_str()),
        ])
        .await
    }
}

#[async_trait::async_trait]
impl CustomerApi for ApiClient {
    async fn get_current_user_id(&self, access_token: &str) -> Result<i64, Error> {
        let url = format!("{}/User/Query", self.endpoints.customer);

        let resp: GetUserResponse = self
            .post(&url, access_token, None, &json!({ "UserId": null }))
            .await?;

        Ok(resp.user.id)
    }

    async fn search_accounts(
        &self,
        access_token: &str,
        user_id: i64,
        page: PageInfo,
    ) -> Result<Option<Vec<AccountRef>>, Error> {
        let url = format!("{}/Accounts/Search", self.endpoints.customer);
        let body = json!({
            "Predicates": [{
                "Field": "UserId",
                "Operator": "Equals",
                "Value": user_id.to_string(),
            }],
            "Ordering": null,
            "PageInfo": page,
        });

        let resp: SearchAccountsResponse = self.post(&url, access_token, None, &body).await?;

        Ok(resp.accounts.map(|accounts| {
            accounts
                .into_iter()
                .map(|acct| AccountRef {
                    id: acct.id,
                    name: acct.name,
                    parent_customer_id: acct.parent_customer_id,
                })
                .collect()
        }))
    }
}

#[async_trait::async_trait]
impl ReportingApi for ApiClient {
    async fn submit(
        &self,
        access_token: &str,
        account: &AccountRef,
        definition: &ReportDefinition,
    ) -> Result<JobHandle, Error> {
        let url = format!("{}/GenerateReport/Submit", self.endpoints.reporting);
        let body = json!({ "ReportRequest": definition });

        let resp: SubmitResponse = self
            .post(
                &url,
                access_token,
                Some((account.parent_customer_id, account.id)),
                &body,
            )
            .await?;

        Ok(JobHandle {
            request_id: resp.report_request_id,
            account_id: account.id,
            customer_id: account.parent_customer_id,
            download_url: None,
        })
    }

    async fn poll(&self, access_token: &str, handle: &JobHandle) -> Result<ReportStatus, Error> {
        let url = format!("{}/GenerateReport/Poll", self.endpoints.reporting);
        let body = json!({ "ReportRequestId": handle.request_id });

        let resp: PollResponse = self
            .post(
                &url,
                access_token,
                Some((handle.customer_id, handle.account_id)),
                &body,
            )
            .await?;

        Ok(ReportStatus {
            status: resp.report_request_status.status,
            download_url: resp.report_request_status.report_download_url,
        })
    }

    async fn download(
        &self,
        access_token: &str,
        handle: &JobHandle,
        target: &DownloadTarget,
    ) -> Result<Option<PathBuf>, Error> {
        let download_url = match &handle.download_url {
            Some(url) => url.clone(),
            None => match self.poll(access_token, handle).await?.download_url {
                Some(url) => url,
                None => return Ok(None),
            },
        };

        let path = target.directory.join(&target.file_name);
        if !target.overwrite && path.exists() {
            return Err(Error::FileExists {
                path: path.display().to_string(),
            });
        }

        let fetch = async {
            let resp = self
                .client
                .get(&download_url)
                .timeout(target.timeout)
                .send()
                .await?
                .error_for_status()?;
            resp.bytes().await
        };

        let bytes = tokio::time::timeout(target.timeout, fetch)
            .await
            .map_err(|_| Error::DownloadTimedOut {
                timeout_ms: target.timeout.as_millis(),
            })??;

        let contents = if target.decompress {
            decompress(&bytes)?
        } else {
            bytes.to_vec()
        };

        tokio::fs::create_dir_all(&target.directory).await?;
        tokio::fs::write(&path, contents).await?;

        info!("Download result file: {}", path.display());
        Ok(Some(path))
    }
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Unpacks the single report file of a zipped download. Other payloads pass through.
fn decompress(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    if !bytes.starts_with(ZIP_MAGIC) {
        return Ok(bytes.to_vec());
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut entry = archive.by_index(0)?;
    let mut contents = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut contents)?;

    Ok(contents)
}

/// Collections of a REST fault body and the element name each holds.
const FAULT_COLLECTIONS: [(&str, &str); 4] = [
    ("Errors", "AdApiError"),
    ("OperationErrors", "OperationError"),
    ("BatchErrors", "BatchError"),
    ("EditorialErrors", "EditorialError"),
];

/// Rebuilds a REST fault body as the nested fault detail tree the decoder matches,
/// e.g. `{"Type": "ApiFaultDetail", "BatchErrors": [..]}` becomes
/// `{"ApiFaultDetail": {"BatchErrors": {"BatchError": [..]}}}`.
fn fault_detail_from_body(body: &str) -> Value {
    let Ok(Value::Object(mut fault)) = serde_json::from_str::<Value>(body) else {
        return Value::String(body.to_string());
    };

    let Some(Value::String(fault_type)) = fault.remove("Type") else {
        return Value::Object(fault);
    };

    // Empty collections are dropped so they cannot shadow a populated one.
    for (collection, element) in FAULT_COLLECTIONS {
        if let Some(errors) = fault.remove(collection) {
            if errors.is_null() || errors.as_array().is_some_and(|e| e.is_empty()) {
                continue;
            }
            let mut wrapped = Map::new();
            wrapped.insert(element.to_string(), errors);
            fault.insert(collection.to_string(), Value::Object(wrapped));
        }
    }

    let mut detail = Map::new();
    detail.insert(fault_type, Value::Object(fault));
    Value::Object(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::fault::{self, DecodedFault, FaultShape};
    use std::io::Write;
    use tempfile::TempDir;

    fn client_for(dir: &std::path::Path) -> ApiClient {
        let mut config = test_config(dir);
        config.environment = Environment::Production;
        ApiClient::new(&config)
    }

    #[test]
    fn test_authorization_url() {
        let temp_dir = TempDir::new().unwrap();
        let client = client_for(temp_dir.path());

        let url = client.authorization_url("xyz").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("login.microsoftonline.com"));
        assert!(url.path().ends_with("/oauth2/v2.0/authorize"));
        assert!(pairs.contains(&("client_id".to_string(), "test_client".to_string())));
        assert!(pairs.contains(&("response_type".to_string(), "code".to_string())));
        assert!(pairs.contains(&("state".to_string(), "xyz".to_string())));
    }

    #[test]
    fn test_endpoint_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path());
        config.reporting_api_url = Some("http://localhost:9000/Reporting/v13".to_string());

        let endpoints = Endpoints::new(&config);

        assert_eq!(endpoints.reporting, "http://localhost:9000/Reporting/v13");
        assert!(endpoints.customer.contains("sandbox"));
    }

    #[test]
    fn test_fault_detail_from_rest_body() {
        let body = r#"{
            "TrackingId": "abc",
            "Type": "ApiFaultDetail",
            "BatchErrors": [{ "Code": 1001, "Message": "Invalid column" }],
            "OperationErrors": []
        }"#;

        let detail = fault_detail_from_body(body);
        let decoded = fault::decode(&detail).unwrap();

        let DecodedFault::Structured { shape, records } = decoded else {
            panic!("Expected structured fault");
        };
        assert_eq!(shape, FaultShape::BatchErrors);
        assert_eq!(records[0].message.as_deref(), Some("Invalid column"));
    }

    #[test]
    fn test_fault_detail_skips_empty_collections() {
        let body = r#"{
            "Type": "ApiFaultDetail",
            "BatchErrors": [],
            "EditorialErrors": null,
            "OperationErrors": [{ "Code": 2100, "Message": "Invalid report columns" }]
        }"#;

        let detail = fault_detail_from_body(body);
        assert!(detail["ApiFaultDetail"].get("BatchErrors").is_none());
        assert!(detail["ApiFaultDetail"].get("EditorialErrors").is_none());

        let DecodedFault::Structured { shape, records } = fault::decode(&detail).unwrap() else {
            panic!("Expected structured fault");
        };
        assert_eq!(shape, FaultShape::OperationErrors);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code.as_deref(), Some("2100"));
        assert_eq!(records[0].message.as_deref(), Some("Invalid report columns"));
    }

    #[test]
    fn test_fault_detail_from_ad_api_body() {
        let body = r#"{"Type": "AdApiFaultDetail", "Errors": [{"Code": 105, "ErrorCode": "InvalidCredentials"}]}"#;

        let detail = fault_detail_from_body(body);

        assert_eq!(
            detail["AdApiFaultDetail"]["Errors"]["AdApiError"][0]["ErrorCode"],
            "InvalidCredentials"
        );
    }

    #[test]
    fn test_fault_detail_from_non_json_body() {
        let detail = fault_detail_from_body("Service Unavailable");
        assert_eq!(detail, Value::String("Service Unavailable".to_string()));
    }

    #[test]
    fn test_decompress_zip_payload() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("report.csv", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"\"AccountId\"\n\"1\"\n").unwrap();
        let archive = writer.finish().unwrap().into_inner();

        let contents = decompress(&archive).unwrap();

        assert_eq!(contents, b"\"AccountId\"\n\"1\"\n");
    }

    #[test]
    fn test_decompress_plain_payload() {
        let contents = decompress(b"AccountId\n1\n").unwrap();
        assert_eq!(contents, b"AccountId\n1\n");
    }

    #[test]
    fn test_account_ids_accept_numbers_and_strings() {
        let resp: SearchAccountsResponse = serde_json::from_str(
            r#"{"Accounts": [
                {"Id": 123, "Name": "Numbers", "ParentCustomerId": 9},
                {"Id": "456", "Name": "Strings", "ParentCustomerId": "10"}
            ]}"#,
        )
        .unwrap();

        let accounts = resp.accounts.unwrap();
        assert_eq!(accounts[0].id, 123);
        assert_eq!(accounts[1].id, 456);
        assert_eq!(accounts[1].parent_customer_id, 10);
    }

    #[test]
    fn test_search_accounts_absent_collection() {
        let resp: SearchAccountsResponse = serde_json::from_str(r#"{"Accounts": null}"#).unwrap();
        assert!(resp.accounts.is_none());
    }

    #[tokio::test]
    async fn test_download_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let client = client_for(temp_dir.path());
        std::fs::write(temp_dir.path().join("1_report_input.csv"), "old").unwrap();

        let handle = JobHandle {
            request_id: "r".to_string(),
            account_id: 1,
            customer_id: 2,
            download_url: Some("http://127.0.0.1:9/report.zip".to_string()),
        };
        let target = DownloadTarget {
            directory: temp_dir.path().to_path_buf(),
            file_name: "1_report_input.csv".to_string(),
            decompress: true,
            overwrite: false,
            timeout: Duration::from_secs(1),
        };

        let result = client.download("token", &handle, &target).await;
        assert!(matches!(result.unwrap_err(), Error::FileExists { .. }));
    }

    #[tokio::test]
    async fn test_request_invalid_url() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path());
        config.customer_api_url = Some("invalid_url".to_string());
        let client = ApiClient::new(&config);

        let result = client.get_current_user_id("token").await;
        assert!(matches!(result.unwrap_err(), Error::Api(_)));
    }
}
