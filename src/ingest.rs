//! CSV flow-record ingestion.
//!
//! Reads a header-prefixed CSV export into [`FlowRecord`]s. The source,
//! destination and metric columns are mandatory, as is every extra column
//! named in the group key. Every other column is carried through untouched.
//! Schema violations abort ingestion.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use tracing::{debug, info};

use crate::config::InputConfig;
use crate::error::SchemaError;
use crate::flow::{FlowRecord, KeySpec};

/// Resolved header positions for the required columns.
#[derive(Debug)]
struct ColumnLayout {
    source: usize,
    destination: usize,
    metric: usize,
    headers: Vec<String>,
}

impl ColumnLayout {
    fn resolve(
        headers: &csv::StringRecord,
        input: &InputConfig,
        key_spec: &KeySpec,
    ) -> Result<Self, SchemaError> {
        let headers: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| SchemaError::MissingColumn(name.to_string()))
        };

        let layout = Self {
            source: position(&input.source_column)?,
            destination: position(&input.destination_column)?,
            metric: position(&input.metric_column)?,
            headers: headers.clone(),
        };

        for column in key_spec.extra_columns() {
            position(column)?;
        }

        Ok(layout)
    }

    fn is_core(&self, index: usize) -> bool {
        index == self.source || index == self.destination || index == self.metric
    }
}

/// Reads flow records from a CSV file.
pub fn read_flow_records(
    path: &Path,
    input: &InputConfig,
    key_spec: &KeySpec,
) -> Result<Vec<FlowRecord>, SchemaError> {
    let reader = csv::Reader::from_path(path).map_err(|source| SchemaError::Open {
        path: path.display().to_string(),
        source,
    })?;

    info!("Reading flow records from {}", path.display());
    parse_with(reader, input, key_spec)
}

/// Parses flow records from any CSV byte source.
pub fn parse_flow_records<R: Read>(
    data: R,
    input: &InputConfig,
    key_spec: &KeySpec,
) -> Result<Vec<FlowRecord>, SchemaError> {
    parse_with(csv::Reader::from_reader(data), input, key_spec)
}

fn parse_with<R: Read>(
    mut reader: csv::Reader<R>,
    input: &InputConfig,
    key_spec: &KeySpec,
) -> Result<Vec<FlowRecord>, SchemaError> {
    let headers = reader
        .headers()
        .map_err(|source| SchemaError::Row { row: 1, source })?
        .clone();
    let layout = ColumnLayout::resolve(&headers, input, key_spec)?;

    let mut records = Vec::new();
    for (index, result) in reader.records().enumerate() {
        // Header is line 1
        let row = index + 2;
        let raw = result.map_err(|source| SchemaError::Row { row, source })?;

        let field = |i: usize| raw.get(i).unwrap_or("").trim();
        let metric_raw = field(layout.metric);
        let metric: f64 = metric_raw
            .parse()
            .ok()
            .filter(|m: &f64| m.is_finite())
            .ok_or_else(|| SchemaError::InvalidMetric {
                row,
                column: input.metric_column.clone(),
                value: metric_raw.to_string(),
            })?;

        let extra: BTreeMap<String, String> = layout
            .headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !layout.is_core(*i))
            .map(|(i, name)| (name.clone(), field(i).to_string()))
            .collect();

        records.push(FlowRecord {
            source: field(layout.source).to_string(),
            destination: field(layout.destination).to_string(),
            metric,
            extra,
        });
    }

    debug!("Ingested {} flow records", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::GroupField;
    use std::io::Write;

    const SAMPLE_FLOWS: &str = "\
src_ip_addr,dst_ip_addr,num_octets,dst_port
10.0.0.1,203.0.113.9,1500,443
10.0.0.1,203.0.113.9, 2048 ,443
10.0.0.2,198.51.100.4,64,53
";

    #[test]
    fn test_parse_flow_records() {
        let records =
            parse_flow_records(SAMPLE_FLOWS.as_bytes(), &InputConfig::default(), &KeySpec::default())
                .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].source, "10.0.0.1");
        assert_eq!(records[0].destination, "203.0.113.9");
        assert_eq!(records[1].metric, 2048.0);
        assert_eq!(records[2].extra.get("dst_port").map(String::as_str), Some("53"));
        assert!(!records[0].extra.contains_key("num_octets"));
    }

    #[test]
    fn test_missing_metric_column_is_schema_error() {
        let data = "src_ip_addr,dst_ip_addr,bytes\n10.0.0.1,10.0.0.2,5\n";
        let err = parse_flow_records(data.as_bytes(), &InputConfig::default(), &KeySpec::default())
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn(ref c) if c == "num_octets"));
    }

    #[test]
    fn test_missing_group_column_is_schema_error() {
        let spec = KeySpec::new(vec![GroupField::Source, GroupField::Extra("vlan".to_string())]);
        let err = parse_flow_records(SAMPLE_FLOWS.as_bytes(), &InputConfig::default(), &spec)
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn(ref c) if c == "vlan"));
    }

    #[test]
    fn test_non_numeric_metric_is_schema_error() {
        let data = "src_ip_addr,dst_ip_addr,num_octets\n10.0.0.1,10.0.0.2,lots\n";
        let err = parse_flow_records(data.as_bytes(), &InputConfig::default(), &KeySpec::default())
            .unwrap_err();
        match err {
            SchemaError::InvalidMetric { row, value, .. } => {
                assert_eq!(row, 2);
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_finite_metric_is_schema_error() {
        for (value, row) in [("NaN", 3), ("inf", 3), ("-infinity", 3)] {
            let data = format!("src_ip_addr,dst_ip_addr,num_octets\na,b,1\na,b,{}\n", value);
            let err = parse_flow_records(data.as_bytes(), &InputConfig::default(), &KeySpec::default())
                .unwrap_err();
            match err {
                SchemaError::InvalidMetric { row: r, value: v, .. } => {
                    assert_eq!(r, row);
                    assert_eq!(v, value);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_empty_metric_is_schema_error() {
        let data = "src_ip_addr,dst_ip_addr,num_octets\na,b,\n";
        let err = parse_flow_records(data.as_bytes(), &InputConfig::default(), &KeySpec::default())
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidMetric { row: 2, .. }));
    }

    #[test]
    fn test_empty_input_yields_no_records() {
        let data = "src_ip_addr,dst_ip_addr,num_octets\n";
        let records =
            parse_flow_records(data.as_bytes(), &InputConfig::default(), &KeySpec::default())
                .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_custom_column_names() {
        let input = InputConfig {
            metric_column: "bytes".to_string(),
            source_column: "client".to_string(),
            destination_column: "server".to_string(),
            group_by_columns: vec!["client".to_string(), "server".to_string()],
        };
        let data = "server,bytes,client\nsrv,10,cli\n";
        let records = parse_flow_records(data.as_bytes(), &input, &KeySpec::default()).unwrap();
        assert_eq!(records[0], FlowRecord::new("cli", "srv", 10.0));
    }

    #[test]
    fn test_read_flow_records_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_FLOWS.as_bytes()).unwrap();

        let records =
            read_flow_records(file.path(), &InputConfig::default(), &KeySpec::default()).unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_flow_records(
            Path::new("/nonexistent/flows.csv"),
            &InputConfig::default(),
            &KeySpec::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Open { .. }));
    }
}
