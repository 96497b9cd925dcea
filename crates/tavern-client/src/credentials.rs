//! Where the client's auth token comes from.

use std::future::Future;

use crate::ClientError;

/// Supplies the token sent in the `auth` frame.
///
/// `token` is asked again on every (re)connect. `refresh` is called when
/// the server answers with an `error` frame, so a provider backed by a
/// login service can fetch a new token before the next attempt.
pub trait CredentialsProvider: Send + Sync + 'static {
    fn token(&self) -> impl Future<Output = Result<String, ClientError>> + Send;

    fn refresh(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// A fixed token. A blank one is reported as missing rather than sent.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialsProvider for StaticCredentials {
    async fn token(&self) -> Result<String, ClientError> {
        if self.token.trim().is_empty() {
            return Err(ClientError::Credentials("token is empty".into()));
        }
        Ok(self.token.clone())
    }
}
