#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use reach_scan_rs::probe::Network;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Deterministic in-memory network: answers come from fixed tables.
#[derive(Default)]
pub struct FakeNetwork {
    reachable: HashSet<String>,
    open: HashSet<(String, u16)>,
    delay: Duration,
    final_port: Option<u16>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    echo_calls: AtomicUsize,
    connect_calls: AtomicUsize,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reachable(mut self, host: &str) -> Self {
        self.reachable.insert(host.to_string());
        self
    }

    pub fn open(mut self, host: &str, port: u16) -> Self {
        self.open.insert((host.to_string(), port));
        self
    }

    /// Every echo and every connect takes this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Count a target as busy from its echo until its connect on `port` returns.
    ///
    /// `port` must be the last port of the run's port set. Without it a target is
    /// busy only while its echo is pending.
    pub fn busy_until_port(mut self, port: u16) -> Self {
        self.final_port = Some(port);
        self
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn echo_calls(&self) -> usize {
        self.echo_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn echo(&self, target: &str, _timeout: Duration) -> Result<()> {
        self.echo_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.pause().await;
        if self.final_port.is_none() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if self.reachable.contains(target) {
            Ok(())
        } else {
            bail!("no echo reply from {target}")
        }
    }

    async fn connect(&self, target: &str, port: u16) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.final_port == Some(port) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if self.open.contains(&(target.to_string(), port)) {
            Ok(())
        } else {
            bail!("connection refused")
        }
    }
}

pub fn targets(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
