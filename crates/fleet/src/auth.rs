//! Request authorization.
//!
//! Three identities reach the API:
//! - agents, carrying a capability token in `x-agent-key` that maps to
//!   the node server names it may act for (`*` grants the whole fleet)
//! - admins, carrying the configured token in `x-admin-token`
//! - users, identified by `x-user-id` set by the fronting platform,
//!   which terminates the actual session
//!
//! Everything is deny-by-default: no configured admin token means no
//! admin routes, and an unknown agent token reports for nobody.

use std::collections::HashMap;

use axum::http::HeaderMap;
use tracing::warn;

use stakewatch_common::config::FleetConfig;

pub const AGENT_KEY_HEADER: &str = "x-agent-key";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone, Default)]
pub struct AuthKeeper {
    /// token -> permitted node server names.
    agent_tokens: HashMap<String, Vec<String>>,
    admin_token: Option<String>,
}

impl AuthKeeper {
    pub fn from_config(cfg: &FleetConfig) -> AuthKeeper {
        AuthKeeper {
            agent_tokens: cfg.agent_tokens.clone().unwrap_or_default(),
            admin_token: cfg.admin_token.clone(),
        }
    }

    #[cfg(test)]
    pub fn for_tests(
        agent_tokens: HashMap<String, Vec<String>>,
        admin_token: Option<String>,
    ) -> AuthKeeper {
        AuthKeeper {
            agent_tokens,
            admin_token,
        }
    }

    /// May the holder of `token` act for the server called `server_name`?
    pub fn agent_allowed(&self, token: Option<&str>, server_name: &str) -> bool {
        let token = match token {
            Some(t) => t,
            None => return false,
        };
        match self.agent_tokens.get(token) {
            Some(names) => names.iter().any(|n| n == "*" || n == server_name),
            None => {
                warn!(server_name, "unknown agent token");
                false
            }
        }
    }

    pub fn is_admin(&self, token: Option<&str>) -> bool {
        match (&self.admin_token, token) {
            (Some(expected), Some(got)) => expected == got,
            _ => false,
        }
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub fn agent_key(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, AGENT_KEY_HEADER)
}

pub fn admin_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, ADMIN_TOKEN_HEADER)
}

pub fn user_id(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, USER_ID_HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keeper() -> AuthKeeper {
        let mut tokens = HashMap::new();
        tokens.insert("tok-a".to_string(), vec!["node-1".to_string(), "node-2".to_string()]);
        tokens.insert("tok-fleet".to_string(), vec!["*".to_string()]);
        AuthKeeper::for_tests(tokens, Some("admin-secret".to_string()))
    }

    #[test]
    fn test_agent_token_scoping() {
        let keeper = keeper();
        assert!(keeper.agent_allowed(Some("tok-a"), "node-1"));
        assert!(keeper.agent_allowed(Some("tok-a"), "node-2"));
        assert!(!keeper.agent_allowed(Some("tok-a"), "node-3"));
        assert!(!keeper.agent_allowed(Some("unknown"), "node-1"));
        assert!(!keeper.agent_allowed(None, "node-1"));
    }

    #[test]
    fn test_wildcard_grants_whole_fleet() {
        let keeper = keeper();
        assert!(keeper.agent_allowed(Some("tok-fleet"), "node-1"));
        assert!(keeper.agent_allowed(Some("tok-fleet"), "anything"));
    }

    #[test]
    fn test_admin_token_check() {
        let keeper = keeper();
        assert!(keeper.is_admin(Some("admin-secret")));
        assert!(!keeper.is_admin(Some("wrong")));
        assert!(!keeper.is_admin(None));
    }

    #[test]
    fn test_no_admin_token_configured_denies_all() {
        let keeper = AuthKeeper::for_tests(HashMap::new(), None);
        assert!(!keeper.is_admin(Some("anything")));
        assert!(!keeper.is_admin(None));
    }

    #[test]
    fn test_header_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(AGENT_KEY_HEADER, "tok".parse().unwrap());
        headers.insert(USER_ID_HEADER, "alice".parse().unwrap());
        assert_eq!(agent_key(&headers), Some("tok"));
        assert_eq!(user_id(&headers), Some("alice"));
        assert_eq!(admin_token(&headers), None);
    }
}
