use anyhow::{Context as _, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::fetch::{ApiRequest, Transport};
use crate::nodes::NodeError;

#[derive(Debug, Clone, Deserialize)]
pub struct GlpiCredentials {
    pub base_url: String,
    pub app_token: String,
    pub user_token: String,
}

impl GlpiCredentials {
    /// REST root: the base URL without trailing slashes, ending in `apirest.php`.
    pub fn api_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("apirest.php") {
            base.to_string()
        } else {
            format!("{}/apirest.php", base)
        }
    }
}

/// An open GLPI API session. Close it with [`GlpiSession::close`] once the
/// node is done, whatever the outcome.
#[derive(Debug, Clone)]
pub struct GlpiSession {
    pub api_url: String,
    app_token: String,
    session_token: String,
}

impl GlpiSession {
    pub async fn open(transport: &dyn Transport, credentials: &GlpiCredentials) -> Result<Self> {
        let api_url = credentials.api_url();
        let request = ApiRequest::get(format!("{}/initSession", api_url))
            .header("App-Token", credentials.app_token.as_str())
            .header("Authorization", format!("user_token {}", credentials.user_token));

        let response = transport
            .call(&request)
            .await
            .context("GLPI initSession request failed")?;

        let session_token = response
            .get("session_token")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                NodeError::Session("GLPI initSession failed, no session token returned".to_string())
            })?;

        info!(api_url = %api_url, "GLPI session opened");
        Ok(Self {
            api_url,
            app_token: credentials.app_token.clone(),
            session_token: session_token.to_string(),
        })
    }

    /// Headers every authenticated call carries.
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("app-token".to_string(), self.app_token.clone()),
            ("session-token".to_string(), self.session_token.clone()),
        ]
    }

    /// `killSession`. Failures are logged and swallowed.
    pub async fn close(&self, transport: &dyn Transport) {
        let request =
            ApiRequest::get(format!("{}/killSession", self.api_url)).headers(self.headers());
        match transport.call(&request).await {
            Ok(_) => info!("GLPI session closed"),
            Err(e) => warn!(error = %e, "Error killing GLPI session"),
        }
    }
}
