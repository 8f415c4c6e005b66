//! Flow record data model.
//!
//! A [`FlowRecord`] is one row of traffic-volume input: a source, a
//! destination, a numeric metric and whatever other columns the export
//! carried. Records are grouped by a [`GroupKey`] extracted through a
//! [`KeySpec`], which defaults to the `(source, destination)` pair.

use std::collections::BTreeMap;

use serde::Serialize;

/// One observed traffic aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowRecord {
    pub source: String,
    pub destination: String,
    pub metric: f64,
    /// Every other input column, keyed by header name.
    pub extra: BTreeMap<String, String>,
}

impl FlowRecord {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, metric: f64) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            metric,
            extra: BTreeMap::new(),
        }
    }

    /// Attaches a passthrough column.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Returns the value this record contributes to a group key.
    pub fn group_value(&self, field: &GroupField) -> &str {
        match field {
            GroupField::Source => &self.source,
            GroupField::Destination => &self.destination,
            GroupField::Extra(name) => self.extra.get(name).map(String::as_str).unwrap_or(""),
        }
    }
}

/// A single component of a grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupField {
    Source,
    Destination,
    Extra(String),
}

impl std::fmt::Display for GroupField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupField::Source => write!(f, "source"),
            GroupField::Destination => write!(f, "destination"),
            GroupField::Extra(name) => write!(f, "{}", name),
        }
    }
}

/// Ordered list of fields that make up a group key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    fields: Vec<GroupField>,
}

impl KeySpec {
    pub fn new(fields: Vec<GroupField>) -> Self {
        Self { fields }
    }

    /// Maps configured column names onto record fields.
    ///
    /// Columns matching the source or destination column become the typed
    /// identifiers; anything else is looked up among the passthrough fields.
    pub fn from_columns(columns: &[String], source_column: &str, destination_column: &str) -> Self {
        let fields = columns
            .iter()
            .map(|column| {
                if column == source_column {
                    GroupField::Source
                } else if column == destination_column {
                    GroupField::Destination
                } else {
                    GroupField::Extra(column.clone())
                }
            })
            .collect();

        Self { fields }
    }

    pub fn fields(&self) -> &[GroupField] {
        &self.fields
    }

    /// Passthrough columns the input must provide for this key.
    pub fn extra_columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|field| match field {
            GroupField::Extra(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Extracts the group key for a record.
    pub fn key_for(&self, record: &FlowRecord) -> GroupKey {
        GroupKey(
            self.fields
                .iter()
                .map(|field| record.group_value(field).to_string())
                .collect(),
        )
    }
}

impl Default for KeySpec {
    fn default() -> Self {
        Self::new(vec![GroupField::Source, GroupField::Destination])
    }
}

/// Statistical population identifier. Equal tuples are the same group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey(pub Vec<String>);

impl GroupKey {
    /// Key for the default `(source, destination)` grouping.
    pub fn pair(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self(vec![source.into(), destination.into()])
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(" -> "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_equality() {
        let key1 = GroupKey::pair("10.0.0.1", "8.8.8.8");
        let key2 = GroupKey::pair("10.0.0.1", "8.8.8.8");
        let key3 = GroupKey::pair("10.0.0.2", "8.8.8.8");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_group_key_display() {
        let key = GroupKey::pair("192.168.1.1", "10.0.0.1");
        assert_eq!(key.to_string(), "192.168.1.1 -> 10.0.0.1");
    }

    #[test]
    fn test_default_key_spec_is_source_destination() {
        let record = FlowRecord::new("a", "b", 1.0);
        assert_eq!(KeySpec::default().key_for(&record), GroupKey::pair("a", "b"));
    }

    #[test]
    fn test_key_spec_from_columns() {
        let columns = vec![
            "dst_ip_addr".to_string(),
            "protocol".to_string(),
            "src_ip_addr".to_string(),
        ];
        let spec = KeySpec::from_columns(&columns, "src_ip_addr", "dst_ip_addr");

        assert_eq!(
            spec.fields(),
            &[
                GroupField::Destination,
                GroupField::Extra("protocol".to_string()),
                GroupField::Source,
            ]
        );
        assert_eq!(spec.extra_columns().collect::<Vec<_>>(), vec!["protocol"]);

        let record = FlowRecord::new("a", "b", 1.0).with_field("protocol", "tcp");
        assert_eq!(
            spec.key_for(&record),
            GroupKey(vec!["b".to_string(), "tcp".to_string(), "a".to_string()])
        );
    }

    #[test]
    fn test_missing_extra_field_groups_as_empty() {
        let spec = KeySpec::new(vec![GroupField::Extra("vlan".to_string())]);
        let record = FlowRecord::new("a", "b", 1.0);
        assert_eq!(spec.key_for(&record), GroupKey(vec![String::new()]));
    }
}
