use crate::aggregator::ResultSender;
use async_trait::async_trait;
use model::{Host, ProbeResult};
use std::{sync::Arc, time::Duration};
use tokio::{process::Command, sync::watch, task::JoinHandle, time};

const PROBER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// What a single probe attempt observed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub ip: String,
    pub rtt: Duration,
    pub success: bool,
}

impl ProbeOutcome {
    fn failure(ip: String) -> Self {
        Self {
            ip,
            rtt: Duration::ZERO,
            success: false,
        }
    }
}

/// One reachability measurement against an address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, address: &str, timeout: Duration) -> ProbeOutcome;
}

// `--` keeps a host name starting with '-' from being read as an option.
fn ping_args(address: &str, timeout: Duration) -> Vec<String> {
    // ping -W takes whole seconds
    let wait_secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
    vec![
        "-n".to_string(),
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        wait_secs.to_string(),
        "--".to_string(),
        address.to_string(),
    ]
}

/// Probe backed by the system `ping` binary, one echo request per attempt.
pub struct SystemPing;

#[async_trait]
impl Probe for SystemPing {
    async fn probe(&self, address: &str, timeout: Duration) -> ProbeOutcome {
        let output = Command::new("ping")
            .args(ping_args(address, timeout))
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let ip = parse_ip(&stdout).unwrap_or_default();
                if !output.status.success() {
                    tracing::trace!("ping {} failed: {}", address, output.status);
                    return ProbeOutcome::failure(ip);
                }
                ProbeOutcome {
                    ip,
                    rtt: parse_rtt(&stdout).unwrap_or_default(),
                    success: true,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to run ping for {}: {}", address, e);
                ProbeOutcome::failure(String::new())
            }
        }
    }
}

// "PING db (172.17.0.3) 56(84) bytes of data." -> 172.17.0.3
fn parse_ip(output: &str) -> Option<String> {
    let header = output.lines().find(|line| line.starts_with("PING "))?;
    let start = header.find('(')? + 1;
    let end = start + header[start..].find(')')?;
    Some(header[start..end].to_string())
}

// "... icmp_seq=1 ttl=64 time=0.045 ms" -> 45us
fn parse_rtt(output: &str) -> Option<Duration> {
    let start = output.find("time=")? + "time=".len();
    let value: String = output[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let (whole, fraction) = value.split_once('.').unwrap_or((&value, ""));
    let millis: u64 = whole.parse().ok()?;
    // microsecond precision is all ping prints
    let micros: u64 = format!("{:0<3.3}", fraction).parse().ok()?;
    Some(Duration::from_millis(millis) + Duration::from_micros(micros))
}

/// Probing loop of one host.
pub struct Prober {
    name: String,
    host: Host,
    interval: Duration,
    timeout: Duration,
    probe: Arc<dyn Probe>,
    sender: ResultSender,
}

impl Prober {
    pub fn new(
        host: Host,
        interval: Duration,
        timeout: Duration,
        probe: Arc<dyn Probe>,
        sender: ResultSender,
    ) -> Self {
        Self {
            name: format!("Prober-{}", host.id),
            host,
            interval,
            timeout,
            probe,
            sender,
        }
    }

    /// Probes the host once per interval until shutdown is signalled or the
    /// aggregator stops accepting results. Missed ticks are skipped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("{} started for {}", self.name, self.host.name);

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let result = self.probe_once().await;
                    if let Err(e) = self.sender.send(result).await {
                        tracing::warn!("{} stopping: {}", self.name, e);
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    tracing::debug!("{} received shutdown signal", self.name);
                    break;
                }
            }
        }

        tracing::debug!("{} stopped", self.name);
    }

    async fn probe_once(&self) -> ProbeResult {
        let time = chrono::Utc::now();
        let outcome = self.probe.probe(&self.host.name, self.timeout).await;
        tracing::trace!("{} -> {:?}", self.host.name, outcome);

        ProbeResult {
            host_id: self.host.id,
            ip: outcome.ip,
            time,
            rtt: outcome.rtt,
            success: outcome.success,
        }
    }
}

/// Runs one [`Prober`] task per host and stops them together.
pub struct ProberPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<HandleHolder>,
}

impl ProberPool {
    pub fn start(
        hosts: Vec<Host>,
        interval: Duration,
        timeout: Duration,
        probe: Arc<dyn Probe>,
        sender: ResultSender,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = hosts
            .into_iter()
            .map(|host| {
                let prober = Prober::new(host, interval, timeout, probe.clone(), sender.clone());
                let name = prober.name.clone();
                let shutdown_rx = shutdown_rx.clone();
                HandleHolder {
                    name,
                    handle: tokio::spawn(prober.run(shutdown_rx)),
                }
            })
            .collect::<Vec<_>>();

        tracing::info!("ProberPool started with {} probers", handles.len());
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Signals every prober to stop and waits for them; stragglers are aborted.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down ProberPool with {} probers", self.handles.len());
        let _ = self.shutdown_tx.send(true);

        let joins = self.handles.into_iter().map(|holder| async move {
            let HandleHolder { name, mut handle } = holder;
            match time::timeout(PROBER_SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(_) => tracing::trace!("{} completed", name),
                Err(_) => {
                    tracing::warn!("{} did not shut down in time, forcing termination", name);
                    handle.abort();
                }
            }
        });
        futures::future::join_all(joins).await;

        tracing::info!("ProberPool shutdown complete");
    }
}

struct HandleHolder {
    name: String,
    handle: JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    const IPUTILS_OUTPUT: &str = "PING db (172.17.0.3) 56(84) bytes of data.
64 bytes from 172.17.0.3: icmp_seq=1 ttl=64 time=0.045 ms

--- db ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 0.045/0.045/0.045/0.000 ms
";

    const BUSYBOX_OUTPUT: &str = "PING 10.1.2.3 (10.1.2.3): 56 data bytes
64 bytes from 10.1.2.3: seq=0 ttl=64 time=12.500 ms
";

    const LOSS_OUTPUT: &str = "PING web (10.0.0.9) 56(84) bytes of data.

--- web ping statistics ---
1 packets transmitted, 0 received, 100% packet loss, time 0ms
";

    fn make_host(id: i64, name: &str) -> Host {
        Host {
            id,
            name: name.to_string(),
        }
    }

    fn ok_outcome() -> ProbeOutcome {
        ProbeOutcome {
            ip: "172.17.0.3".to_string(),
            rtt: Duration::from_millis(3),
            success: true,
        }
    }

    #[test]
    fn test_parse_iputils_output() {
        assert_eq!(parse_ip(IPUTILS_OUTPUT), Some("172.17.0.3".to_string()));
        assert_eq!(parse_rtt(IPUTILS_OUTPUT), Some(Duration::from_micros(45)));
    }

    #[test]
    fn test_parse_busybox_output() {
        assert_eq!(parse_ip(BUSYBOX_OUTPUT), Some("10.1.2.3".to_string()));
        assert_eq!(parse_rtt(BUSYBOX_OUTPUT), Some(Duration::from_micros(12_500)));
    }

    #[test]
    fn test_parse_lost_packet() {
        assert_eq!(parse_ip(LOSS_OUTPUT), Some("10.0.0.9".to_string()));
        assert_eq!(parse_rtt(LOSS_OUTPUT), None);
    }

    #[test]
    fn test_ping_args_end_options_before_address() {
        assert_eq!(
            ping_args("-f", Duration::from_millis(1500)),
            vec!["-n", "-c", "1", "-W", "2", "--", "-f"]
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_ip("ping: unknown host nowhere"), None);
        assert_eq!(parse_rtt("time=abc"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prober_emits_result_per_tick() {
        let mut probe = MockProbe::new();
        probe
            .expect_probe()
            .withf(|address: &str, timeout: &Duration| {
                address == "db" && *timeout == Duration::from_secs(1)
            })
            .returning(|_, _| ok_outcome());

        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let prober = Prober::new(
            make_host(4, "db"),
            Duration::from_secs(10),
            Duration::from_secs(1),
            Arc::new(probe),
            ResultSender::from(&tx),
        );
        let handle = tokio::spawn(prober.run(shutdown_rx));

        let start = time::Instant::now();
        for _ in 0..3 {
            let result = rx.recv().await.unwrap();
            assert_eq!(result.host_id, 4);
            assert_eq!(result.ip, "172.17.0.3");
            assert_eq!(result.rtt, Duration::from_millis(3));
            assert!(result.success);
        }
        // first tick is immediate, then one per interval
        assert_eq!(time::Instant::now() - start, Duration::from_secs(20));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_prober_reports_failed_probe() {
        let mut probe = MockProbe::new();
        probe
            .expect_probe()
            .returning(|_, _| ProbeOutcome::failure(String::new()));

        let (tx, mut rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let prober = Prober::new(
            make_host(1, "gone"),
            Duration::from_secs(10),
            Duration::from_secs(1),
            Arc::new(probe),
            ResultSender::from(&tx),
        );
        tokio::spawn(prober.run(shutdown_rx));

        let result = rx.recv().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.rtt, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prober_stops_when_queue_is_closed() {
        let mut probe = MockProbe::new();
        probe.expect_probe().returning(|_, _| ok_outcome());

        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let prober = Prober::new(
            make_host(1, "db"),
            Duration::from_secs(10),
            Duration::from_secs(1),
            Arc::new(probe),
            ResultSender::from(&tx),
        );
        drop(tx);
        drop(rx);

        time::timeout(Duration::from_secs(1), prober.run(shutdown_rx))
            .await
            .expect("prober should stop once the queue is gone");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_runs_one_prober_per_host() {
        let mut probe = MockProbe::new();
        probe.expect_probe().returning(|_, _| ok_outcome());

        let (tx, mut rx) = mpsc::channel(8);
        let pool = ProberPool::start(
            vec![make_host(1, "a"), make_host(2, "b"), make_host(3, "c")],
            Duration::from_secs(60),
            Duration::from_secs(1),
            Arc::new(probe),
            ResultSender::from(&tx),
        );

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap().host_id);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3]);

        pool.shutdown().await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
