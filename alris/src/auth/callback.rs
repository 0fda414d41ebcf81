//! Loopback OAuth callback listener.
//!
//! Binds an ephemeral loopback listener, serves a page that forwards the
//! provider's token fragment, and hands the captured tokens back to the
//! auth client.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::client::AuthError;

/// Tokens captured from the provider redirect.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Token lifetime in seconds, when the provider includes it.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// One-shot server that waits for the OAuth redirect.
pub struct CallbackServer {
    addr: SocketAddr,
    rx: mpsc::Receiver<CallbackTokens>,
    task: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind an ephemeral loopback listener.
    pub async fn bind() -> Result<Self, AuthError> {
        let (tx, rx) = mpsc::channel(1);

        let app = Router::new()
            .route("/auth/callback", get(callback_page))
            .route("/auth/capture", get(capture))
            .with_state(tx);

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| {
                AuthError::Callback(format!("could not bind the sign-in listener: {e}"))
            })?;
        let addr = listener.local_addr().map_err(|e| {
            AuthError::Callback(format!("could not bind the sign-in listener: {e}"))
        })?;

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { addr, rx, task })
    }

    /// Redirect URI to hand to the provider.
    pub fn redirect_uri(&self) -> String {
        format!("http://{}/auth/callback", self.addr)
    }

    /// Wait for the browser to deliver tokens, up to `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Result<CallbackTokens, AuthError> {
        let result = tokio::time::timeout(timeout, self.rx.recv()).await;
        self.task.abort();

        match result {
            Ok(Some(tokens)) => Ok(tokens),
            Ok(None) => Err(AuthError::Callback(
                "the sign-in listener closed unexpectedly".to_string(),
            )),
            Err(_) => Err(AuthError::Callback(
                "sign-in was not completed in the browser".to_string(),
            )),
        }
    }
}

/// Serve the page that forwards the URL fragment to `/auth/capture`.
async fn callback_page() -> Html<&'static str> {
    Html(include_str!("callback.html"))
}

/// Receive the forwarded tokens.
async fn capture(
    State(tx): State<mpsc::Sender<CallbackTokens>>,
    Query(tokens): Query<CallbackTokens>,
) -> Html<&'static str> {
    let _ = tx.try_send(tokens);
    Html("<p>Signed in. You can close this tab and return to the terminal.</p>")
}
