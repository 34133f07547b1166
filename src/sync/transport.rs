use std::time::Duration;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::protocol::{MergeRequest, MergeResponse, SyncRequest, SyncResponse};

/// Seam between the coordinator and the wire. Tests drive the coordinator
/// through an in-process implementation; production uses HTTP.
pub trait SyncTransport {
    fn submit_batch(&self, request: &SyncRequest) -> Result<SyncResponse>;

    /// Server-side ownership rewrite, called under the authenticated
    /// identity after the local queue has been rewritten.
    fn merge_user(&self, authenticated_user: Uuid, request: &MergeRequest)
        -> Result<MergeResponse>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn send_error(e: reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::Timeout(e.to_string())
        } else {
            SyncError::Network(e.to_string())
        }
    }
}

impl SyncTransport for HttpTransport {
    fn submit_batch(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let url = format!("{}/api/v1/sync", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .map_err(Self::send_error)?;
        if !resp.status().is_success() {
            return Err(SyncError::Network(format!(
                "sync endpoint returned {}",
                resp.status()
            )));
        }
        resp.json::<SyncResponse>()
            .map_err(|e| SyncError::Network(format!("decode sync response: {e}")))
    }

    fn merge_user(
        &self,
        authenticated_user: Uuid,
        request: &MergeRequest,
    ) -> Result<MergeResponse> {
        let url = format!("{}/api/v1/users/merge", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-user-id", authenticated_user.to_string())
            .json(request)
            .send()
            .map_err(Self::send_error)?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            let detail = resp.text().unwrap_or_default();
            return Err(SyncError::MergeConflict(detail));
        }
        if !resp.status().is_success() {
            return Err(SyncError::Network(format!(
                "merge endpoint returned {}",
                resp.status()
            )));
        }
        resp.json::<MergeResponse>()
            .map_err(|e| SyncError::Network(format!("decode merge response: {e}")))
    }
}
