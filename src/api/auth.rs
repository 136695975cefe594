//! Sign-in flows: password login, email OTP, current user, logout.

use super::client::{AuthenticatedClient, SessionEvent};
use super::error::{ApiError, SessionEndReason};
use super::transport::Transport;
use super::types::{ApiRequest, LoginRequest, OtpRequest, TokenPair, UserProfile, VerifyOtpRequest};
use crate::session_store::Credentials;

impl<T: Transport> AuthenticatedClient<T> {
    /// Exchange username and password for a session.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile, ApiError> {
        let request = ApiRequest::post(self.config().endpoints.login.as_str())
            .anonymous()
            .json(&LoginRequest { username, password })?;
        let tokens: TokenPair = self.send_json(request).await?;
        tracing::info!(username, "Login accepted");
        self.start_session(tokens).await
    }

    /// Ask the backend to email a one-time password.
    pub async fn request_otp(&self, email: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post(self.config().endpoints.request_otp.as_str())
            .anonymous()
            .json(&OtpRequest { email })?;
        self.send(request).await?.error_for_status()?;
        tracing::info!("OTP requested");
        Ok(())
    }

    /// Exchange an emailed one-time password for a session.
    pub async fn verify_otp(&self, email: &str, otp: u32) -> Result<UserProfile, ApiError> {
        let request = ApiRequest::post(self.config().endpoints.verify_otp.as_str())
            .anonymous()
            .json(&VerifyOtpRequest { email, otp })?;
        let tokens: TokenPair = self.send_json(request).await?;
        tracing::info!("OTP verified");
        self.start_session(tokens).await
    }

    /// Profile of the signed-in user. Fetched once per session.
    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        if let Some(user) = self.cached_user() {
            return Ok(user);
        }
        let user: UserProfile = self
            .send_json(ApiRequest::get(self.config().endpoints.current_user.as_str()))
            .await?;
        self.set_cached_user(Some(user.clone()));
        Ok(user)
    }

    /// Drop credentials and tell subscribers the session is over.
    pub fn logout(&self) -> Result<(), ApiError> {
        self.store().clear()?;
        self.set_cached_user(None);
        tracing::info!("Logged out");
        self.emit(SessionEvent::Ended {
            reason: SessionEndReason::LoggedOut,
        });
        Ok(())
    }

    /// Persist issued tokens, then confirm them by loading the user.
    /// Tokens that cannot load a user are discarded.
    async fn start_session(&self, tokens: TokenPair) -> Result<UserProfile, ApiError> {
        let TokenPair {
            access_token,
            refresh_token,
        } = tokens;
        self.store()
            .set(Credentials::new(access_token, refresh_token.unwrap_or_default()))?;
        self.set_cached_user(None);

        match self.current_user().await {
            Ok(user) => {
                self.emit(SessionEvent::Started);
                Ok(user)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not load user after sign-in, discarding tokens");
                if let Err(clear_err) = self.store().clear() {
                    tracing::error!(error = %clear_err, "Failed to clear session store");
                }
                Err(e)
            }
        }
    }
}
