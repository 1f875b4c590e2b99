//! # Pledge State Table
//!
//! Enumerates the lifecycle states and, for every destination, the set of
//! states a pledge may enter it from. The table is the single source of
//! truth for transition legality. There is no transition out of `paid` or
//! `refunded`, and `initiated` / `charge_disputed` are never destinations.
//!
//! | Destination | Allowed sources              |
//! |-------------|------------------------------|
//! | created     | initiated                    |
//! | pending     | created, disputed            |
//! | disputed    | created, pending             |
//! | paid        | pending                      |
//! | refunded    | created, pending, disputed   |

use serde::{Deserialize, Serialize};

/// The lifecycle state of a pledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PledgeState {
    /// Initiated by the payer. The platform has not received money yet.
    Initiated,
    /// The platform has received the money.
    Created,
    /// The issue has been closed, but the pledge has not been paid out.
    Pending,
    /// The pledge has been paid out to the maintainer (terminal).
    Paid,
    /// The pledge was refunded in full before payout (terminal).
    Refunded,
    /// The payer disputed the pledge through the platform.
    Disputed,
    /// The payer disputed the charge with their bank (chargeback).
    ChargeDisputed,
}

impl PledgeState {
    /// Every state, in declaration order.
    pub const ALL: [PledgeState; 7] = [
        Self::Initiated,
        Self::Created,
        Self::Pending,
        Self::Paid,
        Self::Refunded,
        Self::Disputed,
        Self::ChargeDisputed,
    ];

    /// States in which the pledge is listed on, and counted toward, its issue.
    pub const ACTIVE: [PledgeState; 4] =
        [Self::Created, Self::Pending, Self::Paid, Self::Disputed];

    /// Return the wire / database name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Refunded => "refunded",
            Self::Disputed => "disputed",
            Self::ChargeDisputed => "charge_disputed",
        }
    }

    /// Parse a state from its wire / database name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// Whether no further transition is permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Refunded)
    }

    /// Whether the pledge counts toward its issue's visible funding total.
    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// Whether the table admits a transition from `self` into `to`.
    pub fn can_transition_to(&self, to: PledgeState) -> bool {
        allowed_sources(to).contains(self)
    }
}

/// The states a pledge may be in to move into `to`.
pub fn allowed_sources(to: PledgeState) -> &'static [PledgeState] {
    use PledgeState::*;
    match to {
        Created => &[Initiated],
        Pending => &[Created, Disputed],
        Disputed => &[Created, Pending],
        Paid => &[Pending],
        Refunded => &[Created, Pending, Disputed],
        Initiated | ChargeDisputed => &[],
    }
}

impl std::fmt::Display for PledgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
