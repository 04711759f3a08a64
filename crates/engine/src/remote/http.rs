//! HTTP implementation of the remote cart service.
//!
//! Bearer-token JSON over `reqwest`. Every request carries an
//! `X-Request-Id` so server logs can be matched against ours.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use cart_sync_core::{CartLine, LineQuantity, ProductId};
use reqwest::{Method, StatusCode};
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use super::wire::{self, AddLineBody, ReconcileBody, SetQuantityBody};
use super::{CartRemote, RemoteError};
use crate::identity::AccessToken;

/// Client for the remote cart service.
#[derive(Clone)]
pub struct HttpCartRemote {
    inner: Arc<HttpCartRemoteInner>,
}

struct HttpCartRemoteInner {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpCartRemote {
    /// Create a new client rooted at `base_url`.
    ///
    /// `timeout` bounds each HTTP request at the transport level; the engine
    /// applies its own round-trip bound on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            inner: Arc::new(HttpCartRemoteInner { client, base_url }),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        Ok(self.inner.base_url.join(path)?)
    }

    /// Send one authorized request and return the response body.
    async fn send<B: serde::Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        token: &AccessToken,
        body: Option<&B>,
    ) -> Result<String, RemoteError> {
        let url = self.endpoint(path)?;
        let request_id = Uuid::new_v4();
        debug!(%method, %url, %request_id, "Sending cart request");

        let mut request = self
            .inner
            .client
            .request(method, url)
            .bearer_auth(token.expose())
            .header("X-Request-Id", request_id.to_string());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                RemoteError::Unavailable(e.to_string())
            } else {
                RemoteError::Http(e)
            }
        })?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(RemoteError::RateLimited(retry_after));
        }

        let response_text = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                status = %status,
                %request_id,
                body = %response_text.chars().take(500).collect::<String>(),
                "Cart service returned non-success status"
            );
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: response_text,
            });
        }

        Ok(response_text)
    }
}

fn line_path(product_id: ProductId) -> String {
    format!("cart/items/{product_id}")
}

impl CartRemote for HttpCartRemote {
    #[instrument(skip(self, token))]
    async fn read_cart(&self, token: &AccessToken) -> Result<Vec<CartLine>, RemoteError> {
        let body = self.send::<()>(Method::GET, "cart", token, None).await?;
        wire::parse_cart(&body).inspect_err(|e| {
            tracing::error!(
                error = %e,
                body = %body.chars().take(500).collect::<String>(),
                "Failed to parse cart response"
            );
        })
    }

    #[instrument(skip(self, token), fields(product_id = %product_id))]
    async fn add_line(&self, token: &AccessToken, product_id: ProductId) -> Result<(), RemoteError> {
        self.send(
            Method::POST,
            "cart/items",
            token,
            Some(&AddLineBody { product_id }),
        )
        .await
        .map(drop)
    }

    #[instrument(skip(self, token), fields(product_id = %product_id, quantity = quantity.get()))]
    async fn set_line_quantity(
        &self,
        token: &AccessToken,
        product_id: ProductId,
        quantity: NonZeroU32,
    ) -> Result<(), RemoteError> {
        self.send(
            Method::PUT,
            &line_path(product_id),
            token,
            Some(&SetQuantityBody { quantity }),
        )
        .await
        .map(drop)
    }

    #[instrument(skip(self, token), fields(product_id = %product_id))]
    async fn delete_line(
        &self,
        token: &AccessToken,
        product_id: ProductId,
    ) -> Result<(), RemoteError> {
        self.send::<()>(Method::DELETE, &line_path(product_id), token, None)
            .await
            .map(drop)
    }

    #[instrument(skip(self, token))]
    async fn delete_all(&self, token: &AccessToken) -> Result<(), RemoteError> {
        self.send::<()>(Method::DELETE, "cart", token, None)
            .await
            .map(drop)
    }

    #[instrument(skip(self, token, lines), fields(lines = lines.len()))]
    async fn reconcile(
        &self,
        token: &AccessToken,
        lines: &[LineQuantity],
    ) -> Result<(), RemoteError> {
        self.send(
            Method::PUT,
            "cart/sync",
            token,
            Some(&ReconcileBody { items: lines }),
        )
        .await
        .map(drop)
    }
}
