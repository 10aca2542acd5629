use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Ordered, deduplicated set of TCP ports in 1..=65535.
///
/// The first occurrence of a port fixes its position; later duplicates are ignored.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSet {
    ports: Vec<u16>,
    #[serde(skip)]
    seen: HashSet<u16>,
}

impl PortSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `port` unless it is already present. Returns whether it was added.
    pub fn insert(&mut self, port: u16) -> bool {
        if port == 0 || !self.seen.insert(port) {
            return false;
        }
        self.ports.push(port);
        true
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.ports
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().copied()
    }
}

impl FromIterator<u16> for PortSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        let mut set = PortSet::new();
        for p in iter {
            set.insert(p);
        }
        set
    }
}

/// Filter free-text port tokens into a [`PortSet`].
///
/// Tokens are separated by commas and/or whitespace. A token survives only if it is
/// made of ASCII digits and its value lies in 1..=65535; everything else is dropped
/// without error. `"80, abc, -1, 70000, 443"` yields `[80, 443]`.
pub fn parse_port_tokens(s: &str) -> PortSet {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .filter_map(token_to_port)
        .collect()
}

fn token_to_port(token: &str) -> Option<u16> {
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match token.parse::<u32>() {
        Ok(v) if (1..=65535).contains(&v) => Some(v as u16),
        _ => None,
    }
}

/// Parse a ports file content into a deduplicated list of TCP ports (1..=65535).
///
/// Supported formats per line:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` is ignored
/// - whitespace and blank lines are ignored
///
/// Unlike [`parse_port_tokens`] this is strict: a bad line is an error naming the line.
pub fn parse_ports_str(s: &str) -> Result<PortSet> {
    let mut out = PortSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }

        if let Some((a, b)) = line.split_once('-') {
            let start = parse_port_str(a.trim())
                .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
            let end = parse_port_str(b.trim())
                .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
            if start > end {
                bail!("line {line_no}: invalid range {start}-{end} (start > end)");
            }
            for p in start..=end {
                out.insert(p);
            }
            continue;
        }

        let p = parse_port_str(line)
            .with_context(|| format!("line {line_no}: invalid port value: {line}"))?;
        out.insert(p);
    }

    Ok(out)
}

/// Load a port set from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<PortSet> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
