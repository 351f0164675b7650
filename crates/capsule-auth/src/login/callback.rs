//! Callback URL interpretation
//!
//! Every transport delivers the same query-parameter contract: `token` on
//! success, `error` plus `error_description` on failure. An `error` wins
//! even when a `token` rides along; token presence alone is not proof of
//! success.

use crate::login::OAuthOutcome;
use url::Url;

pub(crate) fn outcome_from_url(raw_url: &str, expected_path: &str) -> OAuthOutcome {
    let url = match Url::parse(raw_url) {
        Ok(url) => url,
        Err(e) => {
            return OAuthOutcome::Error {
                message: format!("Malformed callback URL: {}", e),
            }
        }
    };

    if !path_matches(&url, expected_path) {
        return OAuthOutcome::Error {
            message: format!("Unexpected callback path '{}'", url.path()),
        };
    }

    let mut token = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "token" => token = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return OAuthOutcome::Error {
            message: error_description.unwrap_or(error),
        };
    }

    match token {
        Some(token) if !token.is_empty() => OAuthOutcome::Success { token },
        _ => OAuthOutcome::Error {
            message: "No token received from login callback".to_string(),
        },
    }
}

fn path_matches(url: &Url, expected: &str) -> bool {
    let expected = expected.trim_end_matches('/');
    if url.path().trim_end_matches('/') == expected {
        return true;
    }
    // Deep links like capsule://callback?... carry the first segment as the
    // URL host with an empty path.
    url.path().is_empty() && url.host_str() == Some(expected.trim_start_matches('/'))
}
