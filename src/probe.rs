use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tokio::net::{lookup_host, TcpStream};
use tokio::time;
use tracing::debug;

use crate::ports::PortSet;
use crate::types::{now_timestamp, PingStatus, PortStatus, ProbeResult};

/// Echo payload, same size as the classic `ping` default.
const PING_PAYLOAD: [u8; 56] = [0; 56];

/// ICMP identifiers handed out per echo so concurrent pingers don't share one.
static NEXT_IDENT: AtomicU16 = AtomicU16::new(1);

/// The raw network operations a probe is built from.
///
/// Implementations report the underlying cause on failure; [`probe`] applies the
/// per-operation timeouts and collapses every failure into `Failed`/`Closed`.
#[async_trait]
pub trait Network: Send + Sync {
    /// Send one ICMP echo and resolve once a positive reply arrives.
    ///
    /// `timeout` is the caller's reply deadline; implementations with their own
    /// internal deadline must use it instead of a built-in default.
    async fn echo(&self, target: &str, timeout: Duration) -> Result<()>;

    /// Open (and immediately drop) one TCP connection.
    async fn connect(&self, target: &str, port: u16) -> Result<()>;
}

/// Real network access: `surge-ping` for ICMP, tokio sockets for TCP.
///
/// ICMP needs raw or datagram ICMP socket permission; without it every ping
/// reports `Failed` while port checks keep working.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNetwork;

#[async_trait]
impl Network for SystemNetwork {
    async fn echo(&self, target: &str, timeout: Duration) -> Result<()> {
        let ip = lookup_host((target, 0))
            .await?
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| anyhow!("no address for {target}"))?;
        let client = Client::new(&ping_config(ip))?;
        let ident = PingIdentifier(NEXT_IDENT.fetch_add(1, Ordering::Relaxed));
        let mut pinger = client.pinger(ip, ident).await;
        // surge-ping defaults to 2s; the caller's deadline must win in both directions.
        pinger.timeout(timeout);
        pinger.ping(PingSequence(0), &PING_PAYLOAD).await?;
        Ok(())
    }

    async fn connect(&self, target: &str, port: u16) -> Result<()> {
        let _stream = TcpStream::connect((target, port)).await?;
        Ok(())
    }
}

fn ping_config(ip: IpAddr) -> Config {
    match ip {
        IpAddr::V4(_) => Config::default(),
        IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
    }
}

/// Probe one target: a single ping, then every port in `ports`.
///
/// Port checks always run, whatever the ping outcome; hosts that drop ICMP but
/// serve TCP are common. Each check has its own timeout and exactly one attempt.
/// Nothing in here fails: errors and timeouts become `Failed` / `Closed`.
pub async fn probe<N>(
    network: &N,
    target: &str,
    ports: &PortSet,
    ping_timeout: Duration,
    port_timeout: Duration,
) -> ProbeResult
where
    N: Network + ?Sized,
{
    let ping = PingStatus::from_reachable(check_ping(network, target, ping_timeout).await);

    let mut port_status = BTreeMap::new();
    for port in ports.iter() {
        let open = check_port(network, target, port, port_timeout).await;
        port_status.insert(port, PortStatus::from_open(open));
    }

    ProbeResult {
        target: target.to_string(),
        ping,
        ports: port_status,
        timestamp: now_timestamp(),
    }
}

async fn check_ping<N: Network + ?Sized>(network: &N, target: &str, timeout: Duration) -> bool {
    match time::timeout(timeout, network.echo(target, timeout)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(host = %target, error = %e, "ping failed");
            false
        }
        Err(_) => {
            debug!(host = %target, ?timeout, "ping timed out");
            false
        }
    }
}

async fn check_port<N: Network + ?Sized>(
    network: &N,
    target: &str,
    port: u16,
    timeout: Duration,
) -> bool {
    match time::timeout(timeout, network.connect(target, port)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(host = %target, port, error = %e, "port closed");
            false
        }
        Err(_) => {
            debug!(host = %target, port, ?timeout, "port connect timed out");
            false
        }
    }
}
