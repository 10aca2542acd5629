use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::ExportError;
use crate::ports::PortSet;
use crate::types::{PingStatus, PortStatus, ProbeResult, ResultSet};

/// Field delimiter of the exported table.
pub const DELIMITER: u8 = b';';

/// Column layout of one run, fixed when the port set is validated.
///
/// Every row is rendered through the same schema, so the table stays rectangular even
/// if a result were to lack a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSchema {
    ports: Vec<u16>,
}

impl ExportSchema {
    pub fn from_ports(ports: &PortSet) -> Self {
        Self {
            ports: ports.as_slice().to_vec(),
        }
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// `Target;Ping;Port_<p>...;Timestamp`
    pub fn header(&self) -> Vec<String> {
        let mut cols = Vec::with_capacity(self.ports.len() + 3);
        cols.push("Target".to_string());
        cols.push("Ping".to_string());
        cols.extend(self.ports.iter().map(|p| format!("Port_{p}")));
        cols.push("Timestamp".to_string());
        cols
    }

    pub fn row(&self, r: &ProbeResult) -> Vec<String> {
        let mut cols = Vec::with_capacity(self.ports.len() + 3);
        cols.push(r.target.clone());
        cols.push(r.ping.to_string());
        cols.extend(
            self.ports
                .iter()
                .map(|&p| r.port(p).unwrap_or(PortStatus::Closed).to_string()),
        );
        cols.push(r.timestamp.clone());
        cols
    }
}

/// Where the results ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Primary(PathBuf),
    Fallback(PathBuf),
    Console,
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOutcome::Primary(p) => write!(f, "{}", p.display()),
            WriteOutcome::Fallback(p) => write!(f, "{} (fallback)", p.display()),
            WriteOutcome::Console => f.write_str("console"),
        }
    }
}

#[derive(Debug)]
pub struct ExportReport {
    pub outcome: WriteOutcome,
    /// Errors of the tiers tried before the one that succeeded.
    pub failures: Vec<ExportError>,
    pub summary: Summary,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Share {
    pub count: usize,
    pub fraction: f64,
}

impl Share {
    fn of(count: usize, total: usize) -> Self {
        let fraction = if total == 0 {
            0.0
        } else {
            count as f64 / total as f64
        };
        Self { count, fraction }
    }
}

impl fmt::Display for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.1}%)", self.count, self.fraction * 100.0)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PortSummary {
    pub port: u16,
    pub open: Share,
    pub closed: Share,
}

/// Counts over the exported rows, each also given as a fraction of all rows.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Summary {
    pub total: usize,
    pub ping_success: Share,
    pub ping_failed: Share,
    pub ports: Vec<PortSummary>,
}

impl Summary {
    pub fn compute(results: &ResultSet, schema: &ExportSchema) -> Self {
        let total = results.len();
        let success = results
            .iter()
            .filter(|r| r.ping == PingStatus::Success)
            .count();
        let ports = schema
            .ports()
            .iter()
            .map(|&port| {
                let open = results
                    .iter()
                    .filter(|r| r.port(port) == Some(PortStatus::Open))
                    .count();
                PortSummary {
                    port,
                    open: Share::of(open, total),
                    closed: Share::of(total - open, total),
                }
            })
            .collect();
        Summary {
            total,
            ping_success: Share::of(success, total),
            ping_failed: Share::of(total - success, total),
            ports,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Summary ({} targets)", self.total)?;
        writeln!(
            f,
            "  {:<12}: {} success, {} failed",
            "Ping", self.ping_success, self.ping_failed
        )?;
        for p in &self.ports {
            writeln!(
                f,
                "  {:<12}: {} open, {} closed",
                format!("Port {}", p.port),
                p.open,
                p.closed
            )?;
        }
        Ok(())
    }
}

/// Default second-tier location: `<temp dir>/reach_scan_<yyyyMMdd_HHmmss>.csv`.
pub fn default_fallback_path(run_started: OffsetDateTime) -> PathBuf {
    let stamp = run_started
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_else(|_| String::from("00000000_000000"));
    std::env::temp_dir().join(format!("reach_scan_{stamp}.csv"))
}

/// Persist `results`, falling back tier by tier so the data is never dropped.
///
/// 1. `primary`; a missing parent directory is created once and the write retried
/// 2. `fallback`
/// 3. an aligned table written to `console`
///
/// Only if the console write fails too is an error returned.
pub fn export<W: Write>(
    results: &ResultSet,
    schema: &ExportSchema,
    primary: &Path,
    fallback: &Path,
    console: &mut W,
) -> Result<ExportReport, ExportError> {
    let mut failures = Vec::new();

    let outcome = match write_file_tier(primary, schema, results) {
        Ok(()) => WriteOutcome::Primary(primary.to_path_buf()),
        Err(e) => {
            warn!(error = %e, "primary output failed, trying fallback");
            failures.push(e);
            match write_file_tier(fallback, schema, results) {
                Ok(()) => WriteOutcome::Fallback(fallback.to_path_buf()),
                Err(e) => {
                    warn!(error = %e, "fallback output failed, printing results to console");
                    failures.push(e);
                    if let Err(e) = write_table(console, schema, results) {
                        failures.push(ExportError::Console(e));
                        return Err(ExportError::Exhausted(failures));
                    }
                    WriteOutcome::Console
                }
            }
        }
    };

    info!(rows = results.len(), destination = %outcome, "results exported");
    Ok(ExportReport {
        outcome,
        failures,
        summary: Summary::compute(results, schema),
    })
}

fn write_file_tier(
    path: &Path,
    schema: &ExportSchema,
    results: &ResultSet,
) -> Result<(), ExportError> {
    match write_csv_file(path, schema, results) {
        Ok(()) => Ok(()),
        Err(first) => match path.parent().filter(|d| !d.as_os_str().is_empty()) {
            Some(dir) if !dir.exists() => {
                fs::create_dir_all(dir).map_err(|source| ExportError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
                write_csv_file(path, schema, results)
            }
            _ => Err(first),
        },
    }
}

fn write_csv_file(
    path: &Path,
    schema: &ExportSchema,
    results: &ResultSet,
) -> Result<(), ExportError> {
    let file = File::create(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_csv(file, schema, results).map_err(|source| ExportError::Csv {
        path: path.to_path_buf(),
        source,
    })
}

/// Write the header and one row per result as `;`-delimited UTF-8.
pub fn write_csv<W: Write>(out: W, schema: &ExportSchema, results: &ResultSet) -> csv::Result<()> {
    let mut w = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .from_writer(out);
    w.write_record(schema.header())?;
    for r in results.iter() {
        w.write_record(schema.row(r))?;
    }
    w.flush()?;
    Ok(())
}

/// Render every result as an aligned, human-readable table.
pub fn write_table<W: Write>(
    out: &mut W,
    schema: &ExportSchema,
    results: &ResultSet,
) -> io::Result<()> {
    let header = schema.header();
    let rows: Vec<Vec<String>> = results.iter().map(|r| schema.row(r)).collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    writeln!(out, "\nResults ({} targets)", rows.len())?;
    write_table_line(out, &header, &widths)?;
    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    write_table_line(out, &rule, &widths)?;
    for row in &rows {
        write_table_line(out, row, &widths)?;
    }
    out.flush()
}

fn write_table_line<W: Write>(out: &mut W, cells: &[String], widths: &[usize]) -> io::Result<()> {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(c, &w)| format!("{c:<w$}"))
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(out, "{}", line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample() -> (ResultSet, ExportSchema) {
        let ports: PortSet = [80u16, 443].into_iter().collect();
        let schema = ExportSchema::from_ports(&ports);
        let set = ResultSet {
            total: 2,
            cancelled: false,
            entries: vec![
                ProbeResult {
                    target: "10.0.0.1".into(),
                    ping: PingStatus::Success,
                    ports: BTreeMap::from([(80, PortStatus::Open), (443, PortStatus::Closed)]),
                    timestamp: "2024-05-01 12:00:00".into(),
                },
                ProbeResult {
                    target: "10.0.0.2".into(),
                    ping: PingStatus::Failed,
                    ports: BTreeMap::from([(80, PortStatus::Closed), (443, PortStatus::Closed)]),
                    timestamp: "2024-05-01 12:00:01".into(),
                },
            ],
        };
        (set, schema)
    }

    #[test]
    fn csv_layout_matches_schema() {
        let (set, schema) = sample();
        let mut buf = Vec::new();
        write_csv(&mut buf, &schema, &set).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "Target;Ping;Port_80;Port_443;Timestamp\n\
             10.0.0.1;Success;Open;Closed;2024-05-01 12:00:00\n\
             10.0.0.2;Failed;Closed;Closed;2024-05-01 12:00:01\n"
        );
    }

    #[test]
    fn missing_port_renders_closed() {
        let (mut set, schema) = sample();
        set.entries[0].ports.remove(&443);
        let row = schema.row(&set.entries[0]);
        assert_eq!(row[3], "Closed");
        assert_eq!(row.len(), schema.header().len());
    }

    #[test]
    fn summary_counts_and_fractions() {
        let (set, schema) = sample();
        let s = Summary::compute(&set, &schema);
        assert_eq!(s.total, 2);
        assert_eq!(s.ping_success, Share { count: 1, fraction: 0.5 });
        assert_eq!(s.ping_failed.count, 1);
        assert_eq!(s.ports[0].port, 80);
        assert_eq!(s.ports[0].open.count, 1);
        assert_eq!(s.ports[1].closed, Share { count: 2, fraction: 1.0 });
    }

    #[test]
    fn summary_of_empty_run_has_zero_fractions() {
        let ports: PortSet = [22u16].into_iter().collect();
        let schema = ExportSchema::from_ports(&ports);
        let s = Summary::compute(&ResultSet::empty(), &schema);
        assert_eq!(s.ping_success.fraction, 0.0);
        assert_eq!(s.ports[0].open.count, 0);
    }

    #[test]
    fn table_lists_every_row() {
        let (set, schema) = sample();
        let mut buf = Vec::new();
        write_table(&mut buf, &schema, &set).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Target    Ping     Port_80  Port_443  Timestamp"));
        assert!(text.contains("10.0.0.1  Success  Open     Closed    2024-05-01 12:00:00"));
        assert!(text.contains("10.0.0.2  Failed"));
    }

    #[test]
    fn fallback_name_derives_from_run_time() {
        let at = time::macros::datetime!(2024-02-03 04:05:06 UTC);
        let p = default_fallback_path(at);
        assert_eq!(
            p.file_name().and_then(|n| n.to_str()),
            Some("reach_scan_20240203_040506.csv")
        );
    }
}
