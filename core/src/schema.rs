//! Output table schemas.
//!
//! RULE: the column order of every output table is defined here and only
//! here. Transformers project onto these schemas, the loader creates tables
//! from them, and the quality gate validates against them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    Boolean,
    Date,
    Timestamp,
}

impl ColumnKind {
    /// SQLite column affinity used when creating warehouse tables.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text | Self::Date | Self::Timestamp => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> ColumnDef {
    ColumnDef { name, kind }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    Fact,
    Dimension,
}

#[derive(Debug, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub role: TableRole,
    pub columns: &'static [ColumnDef],
    pub primary_key: Option<&'static str>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_fact(&self) -> bool {
        self.role == TableRole::Fact
    }
}

use ColumnKind::{Boolean, Date, Integer, Real, Text, Timestamp};

pub const FACT_WITHDRAWALS: TableSchema = TableSchema {
    name: "fact_withdrawals",
    role: TableRole::Fact,
    columns: &[
        col("id", Integer),
        col("event_timestamp", Timestamp),
        col("user_id", Text),
        col("amount", Real),
        col("interface", Text),
        col("currency", Text),
        col("tx_status", Text),
    ],
    primary_key: Some("id"),
};

pub const FACT_DEPOSITS: TableSchema = TableSchema {
    name: "fact_deposits",
    role: TableRole::Fact,
    columns: &[
        col("id", Integer),
        col("event_timestamp", Timestamp),
        col("user_id", Text),
        col("amount", Real),
        col("currency", Text),
        col("tx_status", Text),
    ],
    primary_key: Some("id"),
};

pub const FACT_EVENTS: TableSchema = TableSchema {
    name: "fact_events",
    role: TableRole::Fact,
    columns: &[
        col("id", Integer),
        col("event_timestamp", Timestamp),
        col("user_id", Text),
        col("event_name", Text),
    ],
    primary_key: Some("id"),
};

pub const DIM_USER: TableSchema = TableSchema {
    name: "dim_user",
    role: TableRole::Dimension,
    columns: &[
        col("user_id", Text),
        col("jurisdiction", Text),
        col("level", Text),
    ],
    primary_key: Some("user_id"),
};

pub const DIM_CURRENCY: TableSchema = TableSchema {
    name: "dim_currency",
    role: TableRole::Dimension,
    columns: &[col("currency_name", Text), col("currency_id", Integer)],
    primary_key: Some("currency_id"),
};

pub const DIM_INTERFACE: TableSchema = TableSchema {
    name: "dim_interface",
    role: TableRole::Dimension,
    columns: &[col("interface_name", Text), col("interface_id", Integer)],
    primary_key: Some("interface_id"),
};

pub const DIM_TIME: TableSchema = TableSchema {
    name: "dim_time",
    role: TableRole::Dimension,
    columns: &[
        col("date", Date),
        col("year", Integer),
        col("month", Integer),
        col("day", Integer),
        col("quarter", Integer),
        col("day_of_week", Integer),
        col("is_weekend", Boolean),
        col("time_id", Integer),
    ],
    primary_key: Some("time_id"),
};

pub const DIM_EVENT_TYPE: TableSchema = TableSchema {
    name: "dim_event_type",
    role: TableRole::Dimension,
    columns: &[col("event_type_name", Text), col("event_type_id", Integer)],
    primary_key: Some("event_type_id"),
};

/// Every output table, in load order (facts first).
pub const ALL_TABLES: [&TableSchema; 8] = [
    &FACT_WITHDRAWALS,
    &FACT_DEPOSITS,
    &FACT_EVENTS,
    &DIM_USER,
    &DIM_CURRENCY,
    &DIM_INTERFACE,
    &DIM_TIME,
    &DIM_EVENT_TYPE,
];

pub fn by_name(name: &str) -> Option<&'static TableSchema> {
    ALL_TABLES.iter().copied().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_schemas_keep_their_published_column_order() {
        assert_eq!(
            FACT_WITHDRAWALS.column_names(),
            ["id", "event_timestamp", "user_id", "amount", "interface", "currency", "tx_status"]
        );
        assert_eq!(
            FACT_DEPOSITS.column_names(),
            ["id", "event_timestamp", "user_id", "amount", "currency", "tx_status"]
        );
        assert_eq!(
            FACT_EVENTS.column_names(),
            ["id", "event_timestamp", "user_id", "event_name"]
        );
    }

    #[test]
    fn every_primary_key_is_a_declared_column() {
        for schema in ALL_TABLES {
            if let Some(key) = schema.primary_key {
                assert!(schema.column(key).is_some(), "{} key {key} missing", schema.name);
            }
        }
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(by_name("dim_time"), Some(&DIM_TIME));
        assert!(by_name("fact_trades").is_none());
    }
}
