use async_trait::async_trait;
use adlens_common::{Error, Result};
use serde::Deserialize;

/// Result of exchanging a refresh token for a new access credential.
#[derive(Debug, Clone)]
pub struct RefreshedCredential {
    pub access_token: String,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// External collaborator contract: exchange a refresh token for a new
/// access credential.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedCredential>;
}

/// External collaborator contract: enumerate the accounts a credential can
/// act on. Only hit on a full cache miss.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn list_accounts(&self, access_token: &str) -> Result<Vec<String>>;
}

/// OAuth-style token exchange against the ads provider's token endpoint.
pub struct HttpTokenExchanger {
    client: reqwest::Client,
    token_url: String,
}

impl HttpTokenExchanger {
    pub fn new(token_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedCredential> {
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| Error::RefreshFailed(format!("token request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::RefreshFailed(format!(
                "token exchange rejected ({status}): {body}"
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::RefreshFailed(format!("failed to parse token response: {e}")))?;

        if token.access_token.trim().is_empty() {
            return Err(Error::RefreshFailed(
                "token response missing access_token".to_string(),
            ));
        }

        Ok(RefreshedCredential {
            access_token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs)),
        })
    }
}

/// Account enumeration against the ads provider's listing endpoint.
pub struct HttpAccountDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAccountDirectory {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[derive(Deserialize)]
struct AccountListResponse {
    accounts: Vec<AccountEntry>,
}

#[derive(Deserialize)]
struct AccountEntry {
    id: String,
}

#[async_trait]
impl AccountDirectory for HttpAccountDirectory {
    async fn list_accounts(&self, access_token: &str) -> Result<Vec<String>> {
        let url = format!("{}/accounts", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Upstream {
                status: 0,
                message: format!("account listing request failed: {e}"),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::AuthRejected(format!(
                "account listing rejected with {status}"
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                status: status.as_u16(),
                message: body,
            });
        }

        let list: AccountListResponse = resp.json().await.map_err(|e| Error::Upstream {
            status: status.as_u16(),
            message: format!("failed to parse account list: {e}"),
        })?;

        Ok(list.accounts.into_iter().map(|a| a.id).collect())
    }
}
