use crate::api_client::{AccountRef, CustomerApi, IdentityApi, OAuthTokens, PageInfo};
use crate::config::Config;
use crate::error::Error;
use crate::token_store::TokenStore;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use reqwest::Url;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

pub const ACCOUNT_PAGE_SIZE: u32 = 100;

/// Access tokens are renewed this long before they actually expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[cfg_attr(test, mockall::automock)]
pub trait ConsentPrompt: Send + Sync + 'static {
    /// Sends the user to `authorization_url` and blocks until the redirect URI is supplied.
    fn request_consent(&self, authorization_url: &Url) -> Result<String, Error>;
}

/// Opens the consent page in the default browser and reads the redirect URI from stdin.
pub struct TerminalConsentPrompt;

impl ConsentPrompt for TerminalConsentPrompt {
    fn request_consent(&self, authorization_url: &Url) -> Result<String, Error> {
        if let Err(err) = open::that(authorization_url.as_str()) {
            warn!("could not open a browser: {}", err);
        }

        let mut stderr = io::stderr();
        writeln!(
            stderr,
            "You need to provide consent for the application to access your Microsoft Advertising accounts.\n\
             Open {} if no browser window appeared. After you have granted consent, \
             please enter the response URI that includes the authorization 'code' parameter:",
            authorization_url
        )?;

        let mut response_uri = String::new();
        io::stdin().lock().read_line(&mut response_uri)?;

        Ok(response_uri.trim().to_string())
    }
}

#[derive(Debug, Clone)]
struct Credential {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// OAuth session against the identity service, plus the accounts it can reach.
pub struct AuthSession {
    identity: Arc<dyn IdentityApi>,
    customer: Arc<dyn CustomerApi>,
    consent: Arc<dyn ConsentPrompt>,
    store: Arc<dyn TokenStore>,
    client_state: String,
    credential: Option<Credential>,
}

impl AuthSession {
    pub fn new(
        config: &Config,
        identity: Arc<dyn IdentityApi>,
        customer: Arc<dyn CustomerApi>,
        consent: Arc<dyn ConsentPrompt>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        AuthSession {
            identity,
            customer,
            consent,
            store,
            client_state: config
                .client_state
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            credential: None,
        }
    }

    /// Authenticates and lists every advertiser account the signed in user can access.
    ///
    /// A stored refresh token is tried first. When there is none, or the identity service
    /// rejects it, the interactive consent flow runs once.
    pub async fn authenticate(&mut self) -> Result<Vec<AccountRef>, Error> {
        self.authenticate_with_oauth().await?;

        let access_token = self.access_token().await?;
        let user_id = self.customer.get_current_user_id(&access_token).await?;
        let accounts = self
            .search_accounts_by_user_id(&access_token, user_id)
            .await?;

        for account in &accounts {
            info!("found account {} ({})", account.id, account.name);
        }

        Ok(accounts)
    }

    /// Current access token, renewed through the refresh token once it has expired.
    pub async fn access_token(&mut self) -> Result<String, Error> {
        let credential = self.credential.as_ref().ok_or(Error::NotAuthenticated)?;

        if !credential.is_expired(Utc::now()) {
            return Ok(credential.access_token.clone());
        }

        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or(Error::NotAuthenticated)?;
        let tokens = self
            .identity
            .request_tokens_by_refresh_token(&refresh_token)
            .await?;

        Ok(self
            .accept_tokens(tokens, Some(refresh_token))?
            .access_token
            .clone())
    }

    async fn authenticate_with_oauth(&mut self) -> Result<(), Error> {
        let (tokens, exchanged) = match self.store.load() {
            Some(refresh_token) => {
                match self
                    .identity
                    .request_tokens_by_refresh_token(&refresh_token)
                    .await
                {
                    Ok(tokens) => (tokens, Some(refresh_token)),
                    Err(Error::OAuthTokenRequest { error, description }) => {
                        warn!(
                            "stored refresh token was rejected ({}: {}), requesting consent",
                            error, description
                        );
                        (self.request_user_consent().await?, None)
                    }
                    Err(err) => return Err(err),
                }
            }
            None => (self.request_user_consent().await?, None),
        };

        self.accept_tokens(tokens, exchanged)?;
        Ok(())
    }

    async fn request_user_consent(&self) -> Result<OAuthTokens, Error> {
        let url = self.identity.authorization_url(&self.client_state)?;
        let response_uri = self.consent.request_consent(&url)?;
        let code = authorization_code(&response_uri, &self.client_state)?;

        self.identity.request_tokens_by_code(&code).await
    }

    /// Installs freshly issued tokens. A rotated refresh token is persisted before the
    /// new credential becomes usable, otherwise the `exchanged` one is kept for renewal.
    fn accept_tokens(
        &mut self,
        tokens: OAuthTokens,
        exchanged: Option<String>,
    ) -> Result<&Credential, Error> {
        if let Some(refresh_token) = &tokens.refresh_token {
            self.store.save(refresh_token)?;
        }

        let refresh_token = tokens.refresh_token.or(exchanged);
        let expires_at = tokens
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs - EXPIRY_MARGIN_SECS));

        let credential = self.credential.insert(Credential {
            access_token: tokens.access_token,
            refresh_token,
            expires_at,
        });

        Ok(&*credential)
    }

    async fn search_accounts_by_user_id(
        &self,
        access_token: &str,
        user_id: i64,
    ) -> Result<Vec<AccountRef>, Error> {
        let mut accounts = vec![];
        let mut page_index = 0;

        loop {
            let page = PageInfo {
                index: page_index,
                size: ACCOUNT_PAGE_SIZE,
            };

            let Some(found) = self
                .customer
                .search_accounts(access_token, user_id, page)
                .await?
            else {
                break;
            };

            let last_page = (found.len() as u32) < ACCOUNT_PAGE_SIZE;
            accounts.extend(found);

            if last_page {
                break;
            }
            page_index += 1;
        }

        Ok(accounts)
    }
}

/// Extracts the authorization code from the redirect URI pasted after consent.
fn authorization_code(response_uri: &str, expected_state: &str) -> Result<String, Error> {
    let url = Url::parse(response_uri.trim())?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(received) = state {
        if received != expected_state {
            return Err(Error::ConsentStateMismatch { received });
        }
    }

    if let Some(error) = error {
        return Err(Error::ConsentDenied {
            error,
            description: description.unwrap_or_default(),
        });
    }

    code.ok_or(Error::MissingAuthorizationCode)
}
