//! Button values exchanged with reviewers.
//!
//! Values are `<tag>:<refId>` strings sent out on cards and received back
//! verbatim on click. Anything else is rejected at parse time.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    ApproveAnswer(String),
    RejectAnswer(String),
    TrainAnswer(String),
    ApproveTools(String),
    RejectTools(String),
    AllowFiltered(String),
    DismissFiltered(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized button value {0:?}")]
pub struct UnknownAction(pub String);

impl ButtonAction {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ApproveAnswer(_) => "approve_answer",
            Self::RejectAnswer(_) => "reject_answer",
            Self::TrainAnswer(_) => "train_answer",
            Self::ApproveTools(_) => "approve_tools",
            Self::RejectTools(_) => "reject_tools",
            Self::AllowFiltered(_) => "allow_filtered",
            Self::DismissFiltered(_) => "dismiss_filtered",
        }
    }

    pub fn ref_id(&self) -> &str {
        match self {
            Self::ApproveAnswer(id)
            | Self::RejectAnswer(id)
            | Self::TrainAnswer(id)
            | Self::ApproveTools(id)
            | Self::RejectTools(id)
            | Self::AllowFiltered(id)
            | Self::DismissFiltered(id) => id,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.tag(), self.ref_id())
    }

    pub fn parse(value: &str) -> Result<Self, UnknownAction> {
        let unknown = || UnknownAction(value.to_string());
        let (tag, ref_id) = value.trim().split_once(':').ok_or_else(unknown)?;
        let ref_id = ref_id.trim();
        if ref_id.is_empty() || ref_id.contains(char::is_whitespace) {
            return Err(unknown());
        }
        let ref_id = ref_id.to_string();
        Ok(match tag {
            "approve_answer" => Self::ApproveAnswer(ref_id),
            "reject_answer" => Self::RejectAnswer(ref_id),
            "train_answer" => Self::TrainAnswer(ref_id),
            "approve_tools" => Self::ApproveTools(ref_id),
            "reject_tools" => Self::RejectTools(ref_id),
            "allow_filtered" => Self::AllowFiltered(ref_id),
            "dismiss_filtered" => Self::DismissFiltered(ref_id),
            _ => return Err(unknown()),
        })
    }
}

impl fmt::Display for ButtonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_tags() {
        assert_eq!(
            ButtonAction::parse("train_answer:abc123"),
            Ok(ButtonAction::TrainAnswer("abc123".to_string()))
        );
        assert_eq!(
            ButtonAction::parse("approve_tools:r9").map(|a| a.tag()),
            Ok("approve_tools")
        );
    }

    #[test]
    fn encode_matches_wire_format() {
        let action = ButtonAction::DismissFiltered("f1".to_string());
        assert_eq!(action.encode(), "dismiss_filtered:f1");
        assert_eq!(action.to_string(), "dismiss_filtered:f1");
    }

    #[test]
    fn malformed_values_are_rejected() {
        for raw in ["", "approve_answer", "approve_answer:", "launch:abc", "approve_answer:a b"] {
            assert_eq!(
                ButtonAction::parse(raw),
                Err(UnknownAction(raw.to_string())),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn ref_ids_may_contain_colons() {
        let action = ButtonAction::parse("reject_answer:ns:42").expect("valid");
        assert_eq!(action.ref_id(), "ns:42");
    }
}
