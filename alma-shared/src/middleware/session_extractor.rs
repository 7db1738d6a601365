use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;

use crate::errors::AppError;
use crate::session::{SessionStore, SESSION_COOKIE};
use crate::types::auth::{AuthUser, OnboardingUser};

/// Handle to the shared session store, exposed to extractors through
/// `FromRef` so every transport resolves tokens against the same mapping.
#[derive(Clone)]
pub struct SessionLayer {
    pub store: Arc<dyn SessionStore>,
    pub ttl: Duration,
}

// Downstream crates implement `FromRef<TheirState>` for `SessionLayer`; the
// orphan rule keeps them from also covering `Arc<TheirState>`, so forward
// through the Arc here where `SessionLayer` is local.
impl<S> FromRef<Arc<S>> for SessionLayer
where
    SessionLayer: FromRef<S>,
{
    fn from_ref(state: &Arc<S>) -> Self {
        SessionLayer::from_ref(&**state)
    }
}

pub fn session_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    jar.get(SESSION_COOKIE).map(|c| c.value().to_string())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    SessionLayer: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let layer = SessionLayer::from_ref(state);

        let token = session_token(parts)
            .ok_or_else(|| AppError::unauthorized("missing session cookie"))?;
        let session = layer
            .store
            .get(&token)
            .await?
            .ok_or_else(|| AppError::unauthorized("invalid or expired session"))?;

        let id = session
            .user_id
            .ok_or_else(|| AppError::unauthorized("login not completed"))?;
        let role = session
            .role
            .ok_or_else(|| AppError::internal("verified session missing role"))?;

        // Sliding expiry: every authenticated request renews the session.
        if let Err(e) = layer.store.touch(&token, layer.ttl).await {
            tracing::warn!(error = %e, "failed to renew session ttl");
        }

        Ok(AuthUser {
            id,
            email: session.email,
            role,
        })
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for OnboardingUser
where
    S: Send + Sync,
    SessionLayer: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let layer = SessionLayer::from_ref(state);

        let token = session_token(parts)
            .ok_or_else(|| AppError::unauthorized("missing session cookie"))?;
        let session = layer
            .store
            .get(&token)
            .await?
            .ok_or_else(|| AppError::unauthorized("no pending login"))?;

        // A fully authenticated caller must not re-enter onboarding.
        if session.is_verified() {
            return Err(AppError::forbidden("account already registered"));
        }

        Ok(OnboardingUser {
            email: session.email,
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::session::{generate_token, MemorySessionStore};
    use crate::types::auth::{SessionData, UserRole};
    use axum::http::Request;
    use uuid::Uuid;

    #[derive(Clone)]
    struct TestState(SessionLayer);

    impl FromRef<TestState> for SessionLayer {
        fn from_ref(state: &TestState) -> SessionLayer {
            state.0.clone()
        }
    }

    fn test_state(store: Arc<MemorySessionStore>) -> TestState {
        TestState(SessionLayer {
            store,
            ttl: Duration::from_secs(60),
        })
    }

    fn parts_with_cookie(token: &str) -> Parts {
        Request::builder()
            .header("cookie", format!("{SESSION_COOKIE}={token}"))
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn known_code(err: AppError) -> ErrorCode {
        match err {
            AppError::Known { code, .. } => code,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn auth_user_rejects_pending_session() {
        let store = Arc::new(MemorySessionStore::new());
        let token = generate_token();
        store
            .set(&token, &SessionData::pending("grad@alumni.edu"), Duration::from_secs(60))
            .await
            .unwrap();

        let state = test_state(store);
        let mut parts = parts_with_cookie(&token);
        let err = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert_eq!(known_code(err), ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn auth_user_rejects_missing_cookie() {
        let state = test_state(Arc::new(MemorySessionStore::new()));
        let mut parts = Request::builder().body(()).unwrap().into_parts().0;
        let err = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert_eq!(known_code(err), ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn auth_user_accepts_verified_session() {
        let store = Arc::new(MemorySessionStore::new());
        let token = generate_token();
        let mut session = SessionData::pending("grad@alumni.edu");
        let id = Uuid::new_v4();
        session.verify(id, "newgrad", "New Grad", None, UserRole::Alumni);
        store.set(&token, &session, Duration::from_secs(60)).await.unwrap();

        let state = test_state(store);
        let mut parts = parts_with_cookie(&token);
        let user = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.role, UserRole::Alumni);
    }

    #[tokio::test]
    async fn onboarding_user_rejects_verified_session() {
        let store = Arc::new(MemorySessionStore::new());
        let token = generate_token();
        let mut session = SessionData::pending("grad@alumni.edu");
        session.verify(Uuid::new_v4(), "newgrad", "New Grad", None, UserRole::Alumni);
        store.set(&token, &session, Duration::from_secs(60)).await.unwrap();

        let state = test_state(store);
        let mut parts = parts_with_cookie(&token);
        let err = OnboardingUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert_eq!(known_code(err), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn onboarding_user_accepts_pending_session() {
        let store = Arc::new(MemorySessionStore::new());
        let token = generate_token();
        store
            .set(&token, &SessionData::pending("grad@alumni.edu"), Duration::from_secs(60))
            .await
            .unwrap();

        let state = test_state(store);
        let mut parts = parts_with_cookie(&token);
        let user = OnboardingUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(user.email, "grad@alumni.edu");
        assert_eq!(user.token, token);
    }
}
