//! Data layouts and per-role broadcast sides.

use serde::{Deserialize, Serialize};

/// The shape of a shared datum's data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// A replicated scalar vector, broadcast from provider to all roles.
    Scalar,
    /// Values keyed by global node id, redistributed by ownership.
    ScalarField,
    /// Values keyed by global element id, redistributed by ownership.
    ElementField,
    /// An in-process constant exposed to a hosted operation. Never
    /// transmitted.
    ScalarParameter,
}

impl Layout {
    /// Field layouts carry per-id ownership and use the redistribution
    /// transport; the other layouts do not.
    pub fn is_field(&self) -> bool {
        matches!(self, Layout::ScalarField | Layout::ElementField)
    }
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Layout::Scalar => "scalar",
            Layout::ScalarField => "scalar_field",
            Layout::ElementField => "element_field",
            Layout::ScalarParameter => "scalar_parameter",
        };
        write!(f, "{}", name)
    }
}

/// Whether the local role provides, consumes, or both provides and consumes
/// one shared datum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastSide {
    Sender,
    Receiver,
    SenderAndReceiver,
}

impl BroadcastSide {
    /// Derive the local side from a datum's provider and receiver lists.
    /// Returns `None` when the role appears in neither list (the role still
    /// participates in global collectives for the datum, but owns no ids).
    pub fn for_role(
        role_name: &str,
        providers: &[String],
        receivers: &[String],
    ) -> Option<BroadcastSide> {
        let provides = providers.iter().any(|name| name == role_name);
        let receives = receivers.iter().any(|name| name == role_name);
        match (provides, receives) {
            (true, true) => Some(BroadcastSide::SenderAndReceiver),
            (true, false) => Some(BroadcastSide::Sender),
            (false, true) => Some(BroadcastSide::Receiver),
            (false, false) => None,
        }
    }

    pub fn sends(&self) -> bool {
        matches!(self, BroadcastSide::Sender | BroadcastSide::SenderAndReceiver)
    }

    pub fn receives(&self) -> bool {
        matches!(
            self,
            BroadcastSide::Receiver | BroadcastSide::SenderAndReceiver
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn side_derivation_covers_all_cases() {
        let providers = names(&["driver"]);
        let receivers = names(&["solver", "driver"]);

        assert_eq!(
            BroadcastSide::for_role("driver", &providers, &receivers),
            Some(BroadcastSide::SenderAndReceiver)
        );
        assert_eq!(
            BroadcastSide::for_role("solver", &providers, &receivers),
            Some(BroadcastSide::Receiver)
        );
        assert_eq!(
            BroadcastSide::for_role("observer", &providers, &receivers),
            None
        );
        assert_eq!(
            BroadcastSide::for_role("driver", &providers, &names(&["solver"])),
            Some(BroadcastSide::Sender)
        );
    }

    #[test]
    fn sender_and_receiver_does_both() {
        assert!(BroadcastSide::SenderAndReceiver.sends());
        assert!(BroadcastSide::SenderAndReceiver.receives());
        assert!(!BroadcastSide::Receiver.sends());
        assert!(!BroadcastSide::Sender.receives());
    }

    #[test]
    fn field_layouts() {
        assert!(Layout::ScalarField.is_field());
        assert!(Layout::ElementField.is_field());
        assert!(!Layout::Scalar.is_field());
        assert!(!Layout::ScalarParameter.is_field());
    }
}
