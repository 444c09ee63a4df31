//! The five raw sources a run reads.
//!
//! A run extracts them in declaration order.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    UserIdentity,
    UserLevel,
    Withdrawals,
    Deposits,
    Events,
}

impl Source {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserIdentity => "user_identity",
            Self::UserLevel => "user_level",
            Self::Withdrawals => "withdrawals",
            Self::Deposits => "deposits",
            Self::Events => "events",
        }
    }

    /// File name used when the configuration does not override it.
    pub fn default_file_name(&self) -> &'static str {
        match self {
            Self::UserIdentity => "user_id_sample_data.csv",
            Self::UserLevel => "user_level_sample_data.csv",
            Self::Withdrawals => "withdrawals_sample_data.csv",
            Self::Deposits => "deposit_sample_data.csv",
            Self::Events => "event_sample_data.csv",
        }
    }
}
