// Shared harness for identity integration tests.
//
// Wires an IdentityService to the in-process store, cache and job queue so
// every flow runs without Postgres or Redis.
#![allow(dead_code)]

use std::sync::Arc;
use storefront_identity::cache::MemoryCache;
use storefront_identity::config::{HashingSettings, TokenSettings};
use storefront_identity::db::MemoryDatabase;
use storefront_identity::jobs::{EmailJob, MemoryJobQueue};
use storefront_identity::models::{RegisterRequest, User};
use storefront_identity::security::{CredentialHasher, JwtMaker, TokenMaker};
use storefront_identity::IdentityService;

pub const TEST_SECRET: &str = "storefront-identity-integration-secret-0123456789";
pub const TEST_ISSUER: &str = "storefront-identity-test";
pub const PASSWORD: &str = "Secr3t!";

pub struct Harness {
    pub service: IdentityService,
    pub db: MemoryDatabase,
    pub cache: MemoryCache,
    pub jobs: MemoryJobQueue,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_token_maker(Arc::new(jwt_maker()))
    }

    pub fn with_token_maker(tokens: Arc<dyn TokenMaker>) -> Self {
        let db = MemoryDatabase::new();
        let cache = MemoryCache::new();
        let jobs = MemoryJobQueue::new();
        let hasher = CredentialHasher::new(&HashingSettings::low_cost()).unwrap();

        let service = IdentityService::new(
            Arc::new(db.clone()),
            Arc::new(cache.clone()),
            Arc::new(jobs.clone()),
            tokens,
            TokenSettings::default(),
            hasher,
        );

        Self {
            service,
            db,
            cache,
            jobs,
        }
    }

    /// Register and activate a password account.
    pub async fn active_user(&self, email: &str, phone: &str) -> User {
        let registration = self
            .service
            .register(register_request(email, phone))
            .await
            .unwrap();
        self.service
            .activate(registration.user.id, &registration.activation_code)
            .await
            .unwrap();
        self.db.user(registration.user.id).await.unwrap()
    }

    /// Plaintext token of the most recent password reset email to `email`.
    pub fn last_reset_token(&self, email: &str) -> Option<String> {
        self.jobs
            .dispatched()
            .into_iter()
            .rev()
            .find_map(|job| match job {
                EmailJob::PasswordReset {
                    email: to, token, ..
                } if to == email => Some(token),
                _ => None,
            })
    }
}

pub fn jwt_maker() -> JwtMaker {
    JwtMaker::new(TEST_SECRET, TEST_ISSUER).unwrap()
}

pub fn register_request(email: &str, phone: &str) -> RegisterRequest {
    RegisterRequest {
        first_name: "Ada".to_string(),
        last_name: "Obi".to_string(),
        email: email.to_string(),
        password: PASSWORD.to_string(),
        phone_number: phone.to_string(),
        country: "NG".to_string(),
    }
}
