use thiserror::Error;

/// Failures surfaced at the observe boundary.
///
/// Requesters never see these. Reviewers get `reviewer_notice()`.
#[derive(Debug, Error)]
pub enum ObserveError {
    /// Unknown and expired references are indistinguishable on purpose.
    #[error("{what} not found or expired")]
    Expired { what: &'static str },

    #[error("answer generation failed: {0}")]
    Generation(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("knowledge persistence failed: {0}")]
    Persistence(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl ObserveError {
    pub fn reviewer_notice(&self) -> String {
        match self {
            Self::Expired { what } => {
                format!("This {what} has expired. Please retry the original action.")
            }
            Self::Generation(e) => format!("Answer generation failed: {}", short(e)),
            Self::Delivery(e) => format!("Could not deliver the message: {}", short(e)),
            Self::Persistence(e) => format!("Could not save to knowledge: {}", short(e)),
            Self::Policy(e) => format!("Channel policy error: {e}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(
        "channel {channel} has no review destination; use `/observe on <review-channel>` or `/observe review <channel>` first"
    )]
    ReviewDestinationRequired { channel: String },

    #[error("review destination must not be empty")]
    EmptyReviewDestination,

    #[error("persist channel policies to {path}: {message}")]
    Persist { path: String, message: String },
}

fn short(message: &str) -> String {
    const LIMIT: usize = 300;
    if message.chars().count() <= LIMIT {
        return message.to_string();
    }
    let mut out: String = message.chars().take(LIMIT).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_notice_is_retryable_wording() {
        let e = ObserveError::Expired { what: "approval" };
        assert_eq!(
            e.reviewer_notice(),
            "This approval has expired. Please retry the original action."
        );
    }

    #[test]
    fn long_errors_are_shortened_for_reviewers() {
        let e = ObserveError::Generation("x".repeat(1000));
        assert!(e.reviewer_notice().len() < 400);
        assert!(e.reviewer_notice().ends_with("..."));
    }

    #[test]
    fn policy_errors_convert() {
        let e: ObserveError = PolicyError::EmptyReviewDestination.into();
        assert!(matches!(e, ObserveError::Policy(_)));
    }
}
