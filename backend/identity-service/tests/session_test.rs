// Integration tests for login sessions
//
// Covers:
// - CreateSession -> RenewAccessToken -> BlockSession lifecycle
// - Cache markers (distinct access / refresh keys per session, cleared on logout)
// - Several concurrent sessions of one user
// - Rejection paths for renew, block and access token verification
// - Token signing and cache failures during CreateSession

mod common;

use chrono::Utc;
use common::{jwt_maker, Harness, PASSWORD};
use mockall::mock;
use std::sync::Arc;
use storefront_identity::cache::{access_key, refresh_key};
use storefront_identity::db::FailPoint;
use storefront_identity::models::User;
use storefront_identity::security::{Payload, TokenError, TokenKind, TokenMaker, TokenRequest};
use storefront_identity::{ErrorCode, IdentityError};
use uuid::Uuid;

mock! {
    pub Maker {}

    impl TokenMaker for Maker {
        fn generate_token(&self, request: &TokenRequest) -> Result<(String, Payload), TokenError>;
        fn verify_token(&self, token: &str) -> Result<Payload, TokenError>;
    }
}

async fn logged_in(h: &Harness) -> User {
    h.active_user("ada@example.com", "+2348012345678").await;
    h.service
        .authenticate("ada@example.com", PASSWORD)
        .await
        .unwrap()
}

// ============================================================================
// Test: Session lifecycle
// ============================================================================
#[tokio::test]
async fn test_create_renew_block_renew() {
    let h = Harness::new();
    let user = logged_in(&h).await;

    let tokens = h
        .service
        .create_session(&user, "integration-test/1.0", "203.0.113.7")
        .await
        .unwrap();
    assert!(tokens.access_token_expires_at < tokens.refresh_token_expires_at);

    let session = h.db.session(tokens.session_id).await.unwrap();
    assert_eq!(session.user_id, user.id);
    assert_eq!(session.client_ip, "203.0.113.7");
    assert_eq!(session.user_agent, "integration-test/1.0");
    assert!(!session.is_blocked);
    assert_ne!(session.refresh_token_hash, tokens.refresh_token);

    let refresh = h
        .service
        .verify_refresh_token(&tokens.refresh_token)
        .unwrap();
    assert_eq!(refresh.id, tokens.session_id);

    let renewed = h.service.renew_access_token(&refresh).await.unwrap();
    assert!(renewed.access_token_expires_at > Utc::now());

    h.service
        .block_session(user.id, &tokens.refresh_token)
        .await
        .unwrap();
    assert!(h.db.session(tokens.session_id).await.unwrap().is_blocked);

    let err = h.service.renew_access_token(&refresh).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);
    assert_eq!(err.to_status().message(), "session is blocked");
}

#[tokio::test]
async fn test_session_markers_use_distinct_keys() {
    let h = Harness::new();
    let user = logged_in(&h).await;

    let tokens = h
        .service
        .create_session(&user, "ua", "127.0.0.1")
        .await
        .unwrap();

    assert!(h.cache.contains(&access_key(user.id, tokens.session_id)));
    assert!(h.cache.contains(&refresh_key(user.id, tokens.session_id)));

    h.service
        .block_session(user.id, &tokens.refresh_token)
        .await
        .unwrap();

    assert!(!h.cache.contains(&access_key(user.id, tokens.session_id)));
    assert!(!h.cache.contains(&refresh_key(user.id, tokens.session_id)));
}

// ============================================================================
// Test: BlockSession rejections
// ============================================================================
#[tokio::test]
async fn test_block_without_match_is_unauthenticated_and_mutates_nothing() {
    let h = Harness::new();
    let user = logged_in(&h).await;
    let tokens = h
        .service
        .create_session(&user, "ua", "127.0.0.1")
        .await
        .unwrap();

    let err = h
        .service
        .block_session(user.id, "not-a-refresh-token")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);
    assert_eq!(err.to_status().message(), "invalid or expired session");

    // someone else's user id with the right token
    let err = h
        .service
        .block_session(Uuid::new_v4(), &tokens.refresh_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);

    assert!(!h.db.session(tokens.session_id).await.unwrap().is_blocked);
    assert!(h.cache.contains(&access_key(user.id, tokens.session_id)));
    assert!(h.cache.contains(&refresh_key(user.id, tokens.session_id)));
}

#[tokio::test]
async fn test_block_twice_fails_second_time() {
    let h = Harness::new();
    let user = logged_in(&h).await;
    let tokens = h
        .service
        .create_session(&user, "ua", "127.0.0.1")
        .await
        .unwrap();

    h.service
        .block_session(user.id, &tokens.refresh_token)
        .await
        .unwrap();
    let err = h
        .service
        .block_session(user.id, &tokens.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err.root(), IdentityError::InvalidSession));
}

#[tokio::test]
async fn test_block_succeeds_when_cache_is_down() {
    let h = Harness::new();
    let user = logged_in(&h).await;
    let tokens = h
        .service
        .create_session(&user, "ua", "127.0.0.1")
        .await
        .unwrap();

    h.cache.set_unavailable(true);
    h.service
        .block_session(user.id, &tokens.refresh_token)
        .await
        .unwrap();
    assert!(h.db.session(tokens.session_id).await.unwrap().is_blocked);
}

// ============================================================================
// Test: RenewAccessToken rejections
// ============================================================================
#[tokio::test]
async fn test_renew_rejects_access_token() {
    let h = Harness::new();
    let user = logged_in(&h).await;
    let tokens = h
        .service
        .create_session(&user, "ua", "127.0.0.1")
        .await
        .unwrap();

    let err = h
        .service
        .verify_refresh_token(&tokens.access_token)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);

    let access = jwt_maker().verify_token(&tokens.access_token).unwrap();
    assert_eq!(access.kind, TokenKind::Access);
    let err = h.service.renew_access_token(&access).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);
}

#[tokio::test]
async fn test_renew_rejects_user_mismatch() {
    let h = Harness::new();
    let user = logged_in(&h).await;
    let tokens = h
        .service
        .create_session(&user, "ua", "127.0.0.1")
        .await
        .unwrap();

    let mut forged = h
        .service
        .verify_refresh_token(&tokens.refresh_token)
        .unwrap();
    forged.user_id = Uuid::new_v4();

    let err = h.service.renew_access_token(&forged).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);
    assert!(matches!(err.root(), IdentityError::SessionUserMismatch));
}

#[tokio::test]
async fn test_renew_rejects_unknown_session() {
    let h = Harness::new();
    let user = logged_in(&h).await;

    // signed correctly but never persisted as a session
    let (_, orphan) = jwt_maker()
        .generate_token(&TokenRequest {
            user_id: user.id,
            role: user.role,
            kind: TokenKind::Refresh,
            ttl: chrono::Duration::hours(1),
            session_id: None,
        })
        .unwrap();

    let err = h.service.renew_access_token(&orphan).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);
    assert_eq!(err.to_status().message(), "invalid or expired refresh token");
}

#[tokio::test]
async fn test_renew_rejects_garbage_refresh_token() {
    let h = Harness::new();
    let err = h.service.verify_refresh_token("garbage").unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);
}

// ============================================================================
// Test: VerifyAccessToken
// ============================================================================
#[tokio::test]
async fn test_access_token_valid_until_logout() {
    let h = Harness::new();
    let user = logged_in(&h).await;
    let tokens = h
        .service
        .create_session(&user, "ua", "127.0.0.1")
        .await
        .unwrap();

    let payload = h
        .service
        .verify_access_token(&tokens.access_token)
        .await
        .unwrap();
    assert_eq!(payload.user_id, user.id);
    assert_eq!(payload.role, user.role);

    let err = h
        .service
        .verify_access_token(&tokens.refresh_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);

    h.service
        .block_session(user.id, &tokens.refresh_token)
        .await
        .unwrap();
    let err = h
        .service
        .verify_access_token(&tokens.access_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);
}

#[tokio::test]
async fn test_renew_supersedes_previous_access_token() {
    let h = Harness::new();
    let user = logged_in(&h).await;
    let tokens = h
        .service
        .create_session(&user, "ua", "127.0.0.1")
        .await
        .unwrap();

    let refresh = h
        .service
        .verify_refresh_token(&tokens.refresh_token)
        .unwrap();
    let renewed = h.service.renew_access_token(&refresh).await.unwrap();

    h.service
        .verify_access_token(&renewed.access_token)
        .await
        .unwrap();
    let err = h
        .service
        .verify_access_token(&tokens.access_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);
}

// ============================================================================
// Test: Several sessions per user
// ============================================================================
#[tokio::test]
async fn test_logout_of_one_session_keeps_the_other() {
    let h = Harness::new();
    let user = logged_in(&h).await;
    let phone = h
        .service
        .create_session(&user, "phone/1.0", "198.51.100.1")
        .await
        .unwrap();
    let laptop = h
        .service
        .create_session(&user, "laptop/1.0", "198.51.100.2")
        .await
        .unwrap();
    assert_ne!(phone.session_id, laptop.session_id);

    h.service
        .block_session(user.id, &phone.refresh_token)
        .await
        .unwrap();

    assert!(!h.cache.contains(&access_key(user.id, phone.session_id)));
    assert!(h.cache.contains(&access_key(user.id, laptop.session_id)));
    assert!(h.cache.contains(&refresh_key(user.id, laptop.session_id)));
    assert!(!h.db.session(laptop.session_id).await.unwrap().is_blocked);

    h.service
        .verify_access_token(&laptop.access_token)
        .await
        .unwrap();
    let err = h
        .service
        .verify_access_token(&phone.access_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);

    let phone_refresh = h
        .service
        .verify_refresh_token(&phone.refresh_token)
        .unwrap();
    let err = h
        .service
        .renew_access_token(&phone_refresh)
        .await
        .unwrap_err();
    assert!(matches!(err.root(), IdentityError::SessionBlocked));
}

#[tokio::test]
async fn test_renewing_another_session_does_not_revive_logged_out_token() {
    let h = Harness::new();
    let user = logged_in(&h).await;
    let phone = h
        .service
        .create_session(&user, "phone/1.0", "198.51.100.1")
        .await
        .unwrap();
    let laptop = h
        .service
        .create_session(&user, "laptop/1.0", "198.51.100.2")
        .await
        .unwrap();

    h.service
        .block_session(user.id, &phone.refresh_token)
        .await
        .unwrap();

    let laptop_refresh = h
        .service
        .verify_refresh_token(&laptop.refresh_token)
        .unwrap();
    let renewed = h
        .service
        .renew_access_token(&laptop_refresh)
        .await
        .unwrap();

    let err = h
        .service
        .verify_access_token(&phone.access_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);
    h.service
        .verify_access_token(&renewed.access_token)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_each_session_blocks_independently() {
    let h = Harness::new();
    let user = logged_in(&h).await;
    let mut sessions = Vec::new();
    for device in ["phone", "laptop", "tablet"] {
        sessions.push(
            h.service
                .create_session(&user, device, "127.0.0.1")
                .await
                .unwrap(),
        );
    }

    for (blocked, tokens) in sessions.iter().enumerate() {
        h.service
            .block_session(user.id, &tokens.refresh_token)
            .await
            .unwrap();

        for (index, other) in sessions.iter().enumerate() {
            let result = h.service.verify_access_token(&other.access_token).await;
            assert_eq!(result.is_ok(), index > blocked, "session {}", index);
        }
    }
    assert_eq!(h.cache.live_entries(), 0);
}

// ============================================================================
// Test: CreateSession failures
// ============================================================================
#[tokio::test]
async fn test_signing_failure_is_internal() {
    let mut maker = MockMaker::new();
    maker
        .expect_generate_token()
        .returning(|_| Err(TokenError::Signing("key unavailable".to_string())));
    let h = Harness::with_token_maker(Arc::new(maker));

    let user = User {
        id: Uuid::new_v4(),
        email: "ada@example.com".into(),
        auth: storefront_identity::models::AuthMethod::Password {
            password_hash: "$argon2id$unused".into(),
        },
        first_name: "Ada".into(),
        last_name: "Obi".into(),
        phone_number: "+2348012345678".into(),
        country: "NG".into(),
        role: storefront_identity::models::Role::Customer,
        is_verified: true,
        is_enabled: true,
        deleted_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    let err = h
        .service
        .create_session(&user, "ua", "127.0.0.1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    assert_eq!(err.to_status().message(), "Internal server error");
    assert_eq!(h.cache.live_entries(), 0);
}

#[tokio::test]
async fn test_cache_failure_aborts_create_session() {
    let h = Harness::new();
    let user = logged_in(&h).await;
    h.cache.set_unavailable(true);

    let err = h
        .service
        .create_session(&user, "ua", "127.0.0.1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
}

#[tokio::test]
async fn test_session_store_failure_evicts_markers() {
    let h = Harness::new();
    let user = logged_in(&h).await;
    h.db.fail_once(FailPoint::CreateSession);

    let err = h
        .service
        .create_session(&user, "ua", "127.0.0.1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    assert_eq!(h.cache.live_entries(), 0);
}
