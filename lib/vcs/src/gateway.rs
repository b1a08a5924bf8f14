//! The VCS gateway seam and its Git smart-HTTP implementation.

use crate::error::VcsError;
use crate::refs::{normalize_ref, parse_ref_advertisement};
use async_trait::async_trait;
use std::time::Duration;

/// Abstract capability to resolve the latest commit of a ref on a remote
/// repository.
///
/// Trigger processors depend on this trait rather than a concrete client,
/// so tests can substitute an in-memory fake.
#[async_trait]
pub trait VcsGateway: Send + Sync {
    /// Returns the commit id the given ref currently points at.
    ///
    /// `ref_name` may be a bare branch name (`main`) or a fully qualified
    /// ref (`refs/heads/main`).
    ///
    /// # Errors
    ///
    /// Returns [`VcsError::Unreachable`] for network failures and timeouts,
    /// [`VcsError::AuthFailed`] when credentials are rejected, and
    /// [`VcsError::RefNotFound`] when the remote does not advertise the ref.
    async fn latest_commit(
        &self,
        repository_url: &str,
        username: &str,
        password: &str,
        ref_name: &str,
    ) -> Result<String, VcsError>;
}

/// Gateway speaking the Git smart-HTTP protocol.
///
/// Resolution is a single `GET <repo>/info/refs?service=git-upload-pack`
/// request; the advertised refs are decoded and the requested ref is
/// extracted. The whole exchange is bounded by the client request timeout,
/// which also bounds how long a processing cycle can hold its row lock on
/// a gateway call.
pub struct GitHttpGateway {
    client: reqwest::Client,
}

impl GitHttpGateway {
    /// Creates a gateway whose requests time out after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`VcsError::Client`] if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(request_timeout: Duration) -> Result<Self, VcsError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| VcsError::Client {
                reason: e.to_string(),
            })?;

        Ok(Self { client })
    }

    /// Fetches and decodes the full ref advertisement of a remote.
    async fn advertised_refs(
        &self,
        repository_url: &str,
        username: &str,
        password: &str,
    ) -> Result<Vec<crate::refs::AdvertisedRef>, VcsError> {
        let url = format!("{}/info/refs", repository_url.trim_end_matches('/'));

        let mut request = self
            .client
            .get(&url)
            .query(&[("service", "git-upload-pack")]);
        if !username.is_empty() {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VcsError::Unreachable {
                    reason: format!("request timed out: {url}"),
                }
            } else {
                VcsError::Unreachable {
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(VcsError::AuthFailed {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(VcsError::Unreachable {
                reason: format!("unexpected status {status} from {url}"),
            });
        }

        let body = response.text().await.map_err(|e| VcsError::Unreachable {
            reason: e.to_string(),
        })?;

        parse_ref_advertisement(&body)
    }
}

#[async_trait]
impl VcsGateway for GitHttpGateway {
    async fn latest_commit(
        &self,
        repository_url: &str,
        username: &str,
        password: &str,
        ref_name: &str,
    ) -> Result<String, VcsError> {
        tracing::debug!(repository = repository_url, ref_name, "Resolving latest commit");

        let wanted = normalize_ref(ref_name);
        let refs = self
            .advertised_refs(repository_url, username, password)
            .await?;

        refs.into_iter()
            .find(|advertised| advertised.ref_name == wanted)
            .map(|advertised| advertised.commit_id)
            .ok_or(VcsError::RefNotFound { ref_name: wanted })
    }
}
