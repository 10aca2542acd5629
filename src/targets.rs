use anyhow::{bail, Context, Result};
use ipnet::{IpNet, Ipv4Net};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use crate::types::ProbeTarget;

/// Turn free-text target input into an ordered list of probe targets.
///
/// - targets are separated by commas and/or whitespace
/// - `#` starts a comment running to the end of the line
/// - tokens containing `/` are treated as IPv4 CIDRs and expanded to host addresses;
///   IPv6 CIDRs are rejected
/// - anything else (hostname, IPv4, IPv6) passes through untouched
///
/// Duplicates are kept; each occurrence is probed on its own.
pub fn parse_targets_str(s: &str) -> Result<Vec<ProbeTarget>> {
    let mut out = Vec::new();
    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().unwrap_or("");
        for token in line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            if token.contains('/') {
                let net = token
                    .parse::<IpNet>()
                    .with_context(|| format!("line {line_no}: invalid CIDR: {token}"))?;
                if let IpNet::V6(_) = net {
                    bail!("line {line_no}: IPv6 CIDR ranges are not supported: {token}");
                }
                out.extend(expand_cidr_to_ips(net).into_iter().map(|ip| ip.to_string()));
            } else {
                out.push(token.to_string());
            }
        }
    }
    Ok(out)
}

/// Load targets from a file using the same rules as [`parse_targets_str`].
pub fn load_targets_from_path(path: impl AsRef<Path>) -> Result<Vec<ProbeTarget>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read targets file: {}", path.as_ref().display()))?;
    parse_targets_str(&content)
}

/// Expand a CIDR into individual IP addresses suitable for host probing.
///
/// For IPv4, excludes the network and broadcast addresses. A /31 or /32 yields no hosts.
/// IPv6 ranges are not expanded and return an empty list.
pub fn expand_cidr_to_ips(cidr: IpNet) -> Vec<IpAddr> {
    match cidr {
        IpNet::V4(n4) => expand_ipv4net_hosts(n4)
            .into_iter()
            .map(IpAddr::V4)
            .collect(),
        IpNet::V6(_) => Vec::new(),
    }
}

fn expand_ipv4net_hosts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if end <= start + 1 {
        return Vec::new();
    }
    (start + 1..end).map(Ipv4Addr::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_targets_pass_through_in_order() {
        let t = parse_targets_str("host-b, 10.0.0.1\nhost-a  ::1").unwrap();
        assert_eq!(t, vec!["host-b", "10.0.0.1", "host-a", "::1"]);
    }

    #[test]
    fn duplicates_are_preserved() {
        let t = parse_targets_str("a a\na").unwrap();
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let t = parse_targets_str("# lab hosts\n\nweb01 # frontend\n   \n").unwrap();
        assert_eq!(t, vec!["web01"]);
    }

    #[test]
    fn cidr_is_expanded_inline() {
        let t = parse_targets_str("gw, 192.168.1.0/30, db").unwrap();
        assert_eq!(t, vec!["gw", "192.168.1.1", "192.168.1.2", "db"]);
    }

    #[test]
    fn bad_cidr_reports_line() {
        let err = parse_targets_str("ok\n10.0.0.0/99").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn ipv6_cidr_is_rejected_with_line() {
        let err = parse_targets_str("web\ndb, fe80::/64").unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("line 2"), "{msg}");
        assert!(msg.contains("fe80::/64"), "{msg}");
    }

    #[test]
    fn tiny_networks_have_no_hosts() {
        let net: IpNet = "10.0.0.4/31".parse().unwrap();
        assert!(expand_cidr_to_ips(net).is_empty());
    }
}
