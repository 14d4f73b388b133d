//! Session marker keys. Markers are per login session so that logging out
//! of one device leaves the others alone.
use uuid::Uuid;

const ACCESS_PREFIX: &str = "access";
const REFRESH_PREFIX: &str = "refresh";

/// Holds the `jti` of the session's current access token.
pub fn access_key(user_id: Uuid, session_id: Uuid) -> String {
    format!("{}:{}:{}", ACCESS_PREFIX, user_id, session_id)
}

/// Holds the session id while the refresh token is live.
pub fn refresh_key(user_id: Uuid, session_id: Uuid) -> String {
    format!("{}:{}:{}", REFRESH_PREFIX, user_id, session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_distinct_per_kind_and_session() {
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();
        assert_eq!(
            access_key(user, session),
            format!("access:{}:{}", user, session)
        );
        assert_eq!(
            refresh_key(user, session),
            format!("refresh:{}:{}", user, session)
        );
        assert_ne!(access_key(user, session), refresh_key(user, session));
        assert_ne!(access_key(user, session), access_key(user, Uuid::new_v4()));
    }
}
