//! Session and anti-forgery token acquisition
//!
//! Token-protected sources embed a CSRF-style token in their landing page.
//! Extraction walks an ordered fallback chain: the structured hidden form
//! field first, then an inline script assignment, then a generic quoted
//! key-value pattern. Acquisition retries a fixed number of times with a
//! short jittered delay; exhausting the retries fails that source's units
//! only, never the whole run.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::domain::error::AuthError;
use crate::infrastructure::config::SourceProfile;
use crate::infrastructure::http_client::PageTransport;

/// Per-source session state. Transport-level cookies live in the source's
/// HTTP client; only the token travels with the session.
#[derive(Debug, Clone)]
pub struct Session {
    pub source_id: String,
    pub token: Option<String>,
}

impl Session {
    pub fn anonymous(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            token: None,
        }
    }
}

pub struct SessionProvider {
    transport: Arc<dyn PageTransport>,
    attempts: u32,
    retry_delay: Duration,
}

impl SessionProvider {
    pub fn new(transport: Arc<dyn PageTransport>, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            transport,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Acquire a session for the source. Sources without a token
    /// requirement get an anonymous session immediately.
    pub async fn acquire(&self, profile: &SourceProfile) -> Result<Session, AuthError> {
        let Some(field) = profile.token_field.as_deref() else {
            return Ok(Session::anonymous(&profile.id));
        };

        let landing = profile
            .landing_url
            .as_deref()
            .unwrap_or(profile.source_url.as_str());

        let mut page_seen = false;
        let mut last_reason = String::new();

        for attempt in 1..=self.attempts {
            match self.transport.get_text(landing).await {
                Ok(html) => {
                    page_seen = true;
                    if let Some(token) = extract_token(&html, field) {
                        debug!(source = %profile.id, attempt, "token acquired");
                        return Ok(Session {
                            source_id: profile.id.clone(),
                            token: Some(token),
                        });
                    }
                    last_reason = format!("no '{field}' pattern matched");
                    warn!(source = %profile.id, attempt, "token not found in landing page");
                }
                Err(e) => {
                    last_reason = e.to_string();
                    warn!(source = %profile.id, attempt, error = %e, "landing page fetch failed");
                }
            }

            if attempt < self.attempts {
                let jitter = fastrand::u64(0..=self.retry_delay.as_millis() as u64 / 2);
                tokio::time::sleep(self.retry_delay + Duration::from_millis(jitter)).await;
            }
        }

        if page_seen {
            Err(AuthError::TokenNotFound {
                source: profile.id.clone(),
                attempts: self.attempts,
            })
        } else {
            Err(AuthError::LandingUnreachable {
                source: profile.id.clone(),
                reason: last_reason,
            })
        }
    }
}

/// Ordered token extraction chain: hidden form input, inline script
/// assignment, generic quoted key-value.
fn extract_token(html: &str, field: &str) -> Option<String> {
    if let Ok(selector) = Selector::parse(&format!("input[name=\"{field}\"]")) {
        let document = Html::parse_document(html);
        if let Some(value) = document
            .select(&selector)
            .next()
            .and_then(|input| input.value().attr("value"))
        {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    let escaped = regex::escape(field);
    let script_assignment =
        Regex::new(&format!(r#"{escaped}\s*[:=]\s*['"]([^'"]+)['"]"#)).ok()?;
    if let Some(captures) = script_assignment.captures(html) {
        return Some(captures[1].to_string());
    }

    let quoted_pair =
        Regex::new(&format!(r#"['"]{escaped}['"]\s*[:,=]\s*['"]([^'"]+)['"]"#)).ok()?;
    quoted_pair
        .captures(html)
        .map(|captures| captures[1].to_string())
}
