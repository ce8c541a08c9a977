use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::OrderApi;
use crate::models::session::SessionContext;

/// Registration-token lifecycle. Rotations arriving before a rider has
/// authenticated are held until a session binds; logout invalidates the
/// backend registration. Registration failures are logged, never fatal.
pub struct TokenRegistrar {
    api: Arc<dyn OrderApi>,
    inner: Mutex<TokenState>,
}

#[derive(Default)]
struct TokenState {
    session: Option<SessionContext>,
    token: Option<String>,
}

impl TokenRegistrar {
    pub fn new(api: Arc<dyn OrderApi>) -> Self {
        Self {
            api,
            inner: Mutex::new(TokenState::default()),
        }
    }

    /// Called on every registration-token rotation from the OS channel.
    pub async fn rotate(&self, token: String) {
        let rider_id = {
            let mut state = self.inner.lock().await;
            state.token = Some(token.clone());
            match &state.session {
                Some(ctx) => ctx.rider_id.clone(),
                None => {
                    debug!("no authenticated rider; token rotation deferred");
                    return;
                }
            }
        };

        match self.api.register_token(&rider_id, &token).await {
            Ok(()) => info!("registration token updated"),
            Err(err) => warn!(error = %err, "token registration failed"),
        }
    }

    /// Bind the authenticated session; flushes a token deferred before
    /// login.
    pub async fn bind_session(&self, ctx: SessionContext) {
        let (rider_id, deferred) = {
            let mut state = self.inner.lock().await;
            let rider_id = ctx.rider_id.clone();
            state.session = Some(ctx);
            (rider_id, state.token.clone())
        };

        if let Some(token) = deferred {
            match self.api.register_token(&rider_id, &token).await {
                Ok(()) => info!("deferred registration token flushed"),
                Err(err) => warn!(error = %err, "deferred token registration failed"),
            }
        }
    }

    /// Called on logout.
    pub async fn invalidate(&self) {
        let session = {
            let mut state = self.inner.lock().await;
            state.token = None;
            state.session.take()
        };

        if let Some(ctx) = session {
            match self.api.invalidate_token(&ctx.rider_id).await {
                Ok(()) => info!("registration token invalidated"),
                Err(err) => warn!(error = %err, "token invalidation failed"),
            }
        }
    }
}
