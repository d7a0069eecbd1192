use async_trait::async_trait;
use serde_json::Value;

use crate::op::Operation;

/// Credentials handed to every channel on dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token; channels report `Failed` when it is missing.
    pub access_token: Option<String>,
}

impl Credentials {
    /// Credentials carrying `token`.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
        }
    }
}

/// Result of sending one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The service accepted the mutation. Carries the response body, if any.
    Acknowledged(Option<Value>),
    /// Transient failure; the operation stays in the log.
    Failed(String),
    /// The service refused the mutation for good; the operation is dropped.
    Rejected(String),
}

impl Outcome {
    /// True for [`Outcome::Acknowledged`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Acknowledged(_))
    }
}

/// Transport for one backend.
#[async_trait]
pub trait RemoteChannel: Send + Sync + 'static {
    /// Backend name, used in logs.
    fn name(&self) -> &str;

    /// Performs the remote call for `op`.
    async fn send(&self, op: &Operation, credentials: &Credentials) -> Outcome;
}

/// Folds per-channel outcomes into one: any failure wins, then any rejection,
/// otherwise acknowledged with the first non-empty body.
///
/// No outcomes at all counts as a failure so the operation is kept.
pub fn combine_outcomes(outcomes: impl IntoIterator<Item = Outcome>) -> Outcome {
    let mut seen_any = false;
    let mut rejected = None;
    let mut body = None;
    for outcome in outcomes {
        seen_any = true;
        match outcome {
            Outcome::Failed(reason) => return Outcome::Failed(reason),
            Outcome::Rejected(reason) => {
                rejected.get_or_insert(reason);
            }
            Outcome::Acknowledged(payload) => {
                if body.is_none() {
                    body = payload;
                }
            }
        }
    }
    if !seen_any {
        return Outcome::Failed("no remote channel registered".to_string());
    }
    match rejected {
        Some(reason) => Outcome::Rejected(reason),
        None => Outcome::Acknowledged(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_beats_rejection_beats_ack() {
        let out = combine_outcomes([
            Outcome::Acknowledged(None),
            Outcome::Rejected("no".into()),
            Outcome::Failed("down".into()),
        ]);
        assert_eq!(out, Outcome::Failed("down".into()));

        let out = combine_outcomes([Outcome::Acknowledged(None), Outcome::Rejected("no".into())]);
        assert_eq!(out, Outcome::Rejected("no".into()));
    }

    #[test]
    fn first_non_empty_body_is_kept() {
        let out = combine_outcomes([
            Outcome::Acknowledged(None),
            Outcome::Acknowledged(Some(json!({"a": 1}))),
            Outcome::Acknowledged(Some(json!({"b": 2}))),
        ]);
        assert_eq!(out, Outcome::Acknowledged(Some(json!({"a": 1}))));
    }

    #[test]
    fn no_channels_is_a_failure() {
        assert!(matches!(combine_outcomes(Vec::new()), Outcome::Failed(_)));
    }
}
