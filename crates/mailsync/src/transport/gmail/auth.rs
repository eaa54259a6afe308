//! Gmail OAuth2 token management
//!
//! Account linking (the authorization code flow) happens elsewhere and leaves
//! a serialized [`StoredToken`] on the account. This module only refreshes
//! access tokens, caching them per account for the process lifetime.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::Account;

/// Refresh when the token expires within this many seconds
const EXPIRY_BUFFER_SECS: i64 = 300;

/// Token data stored in `Account::token_data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(alias = "token")]
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds
    pub expires_at: Option<i64>,
}

impl StoredToken {
    /// Whether the token is usable for at least the refresh buffer
    pub fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at > now + EXPIRY_BUFFER_SECS)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// OAuth2 client credentials plus a per-account access token cache
pub struct GmailAuth {
    agent: ureq::Agent,
    client_id: String,
    client_secret: String,
    tokens: Mutex<HashMap<String, StoredToken>>,
}

impl GmailAuth {
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    pub fn new(agent: ureq::Agent, client_id: String, client_secret: String) -> Self {
        Self {
            agent,
            client_id,
            client_secret,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Get a valid access token for the account, refreshing as needed
    pub fn get_access_token(&self, account: &Account) -> Result<String> {
        let now = Utc::now().timestamp();

        let cached = self.tokens.lock().unwrap().get(&account.id).cloned();
        let token = match cached {
            Some(token) => token,
            None => parse_token_data(account)?,
        };

        if token.is_fresh(now) {
            let access_token = token.access_token.clone();
            self.tokens
                .lock()
                .unwrap()
                .insert(account.id.clone(), token);
            return Ok(access_token);
        }

        let refresh_token = token.refresh_token.with_context(|| {
            format!(
                "Access token for account {} expired and no refresh token is stored",
                account.id
            )
        })?;

        debug!("Refreshing access token for account {}", account.id);
        let fresh = self.refresh_access_token(&refresh_token)?;
        let stored = StoredToken {
            access_token: fresh.access_token,
            refresh_token: fresh.refresh_token.or(Some(refresh_token)),
            expires_at: fresh.expires_in.map(|d| now + d as i64),
        };

        let access_token = stored.access_token.clone();
        self.tokens
            .lock()
            .unwrap()
            .insert(account.id.clone(), stored);
        Ok(access_token)
    }

    /// Drop the cached token so the next call re-reads or refreshes it
    pub fn invalidate(&self, account_id: &str) {
        self.tokens.lock().unwrap().remove(account_id);
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut response = self
            .agent
            .post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            anyhow::bail!("Token refresh rejected with status {}", status);
        }

        response
            .body_mut()
            .read_json()
            .context("Failed to parse refresh token response")
    }
}

fn parse_token_data(account: &Account) -> Result<StoredToken> {
    let data = account
        .token_data
        .as_deref()
        .with_context(|| format!("Account {} has no stored credentials", account.id))?;
    serde_json::from_str(data)
        .with_context(|| format!("Corrupt credentials for account {}", account.id))
}
