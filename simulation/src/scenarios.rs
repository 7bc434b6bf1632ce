//! Pre-defined simulation scenarios
//!
//! Each scenario builds a star, drives it to quiescence and records a
//! [`ScenarioReport`] of what crossed the wire and which checks held.

use std::collections::BTreeMap;

use anyhow::{Context, bail};
use blueprint_core::{BlockPos, PlacementOrigin, Rotation};
use blueprint_protocol::{
    CHUNK_SIZE, ClientConfig, HostConfig, MessageKind, Node, ProtocolConfig, ProtocolError,
    QuotaConfig,
};
use serde::Serialize;
use tracing::info;

use crate::topology::{StarTopology, artifact};

/// Outcome of one named check
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub label: String,
    pub passed: bool,
}

/// Summary of one scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub clients: usize,
    pub frames: usize,
    pub traffic: BTreeMap<String, usize>,
    pub protocol_errors: Vec<String>,
    pub checks: Vec<Check>,
}

impl ScenarioReport {
    fn new(scenario: &str, star: &StarTopology) -> Self {
        Self {
            scenario: scenario.to_string(),
            clients: star.clients.len(),
            frames: star.net.frames().len(),
            traffic: star.traffic(),
            protocol_errors: star
                .net
                .errors()
                .iter()
                .map(|(node, e)| format!("{}: {e}", node_name(*node)))
                .collect(),
            checks: Vec::new(),
        }
    }

    fn check(&mut self, label: impl Into<String>, passed: bool) {
        let label = label.into();
        info!(scenario = %self.scenario, check = %label, passed, "scenario check");
        self.checks.push(Check { label, passed });
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Human-readable summary
    pub fn render(&self) -> String {
        let mut out = format!(
            "=== {} ({} clients, {} frames) ===\n",
            self.scenario, self.clients, self.frames
        );
        for (kind, count) in &self.traffic {
            out.push_str(&format!("  {kind:<20} {count}\n"));
        }
        for error in &self.protocol_errors {
            out.push_str(&format!("  error: {error}\n"));
        }
        for check in &self.checks {
            let mark = if check.passed { "ok  " } else { "FAIL" };
            out.push_str(&format!("  [{mark}] {}\n", check.label));
        }
        out
    }
}

fn node_name(node: Node) -> String {
    match node {
        Node::Host => "host".to_string(),
        Node::Client(index) => format!("player{index}"),
    }
}

/// Connect `clients` current clients, plus one at a rejected version when `legacy` is set
pub fn run_handshake(
    host: &HostConfig,
    clients: usize,
    legacy: bool,
) -> anyhow::Result<ScenarioReport> {
    info!("=== Running handshake scenario ===");
    let mut star = StarTopology::new(host);
    for _ in 0..clients {
        star.connect(ClientConfig::default())?;
    }
    let legacy_index = if legacy {
        Some(star.connect(ClientConfig::default().with_version("0.0.1"))?)
    } else {
        None
    };
    star.net.run_until_idle();
    println!("{}", star.visualize());

    let mut report = ScenarioReport::new("handshake", &star);
    report.check(
        format!("{clients} current clients started"),
        (0..clients).all(|i| star.net.client(i).is_started()),
    );
    report.check(
        "host confirmed every current client",
        star.net.host().context().confirmed.len() == clients,
    );
    if let Some(index) = legacy_index {
        report.check(
            "legacy client never confirmed",
            !star.net.client(index).is_started(),
        );
        report.check("legacy client disconnected", !star.net.is_connected(index));
        report.check(
            "host reported the version rejection",
            star.net
                .errors()
                .iter()
                .any(|(node, e)| *node == Node::Host && matches!(e, ProtocolError::VersionRejected { .. })),
        );
    }
    Ok(report)
}

/// Publish one artifact of `bytes` and have every client download it
pub fn run_transfer(
    host: &HostConfig,
    clients: usize,
    bytes: usize,
) -> anyhow::Result<ScenarioReport> {
    info!("=== Running transfer scenario ===");
    let mut star = StarTopology::with_clients(host, clients)?;
    let content = artifact(bytes, 0);
    let placement = star.publish(content.clone(), "artifact.litematic")?;
    star.net.run_until_idle();
    star.net.clear_frames();

    for index in 0..clients {
        let span = blueprint_logging::node_span("client", &star.clients[index].name);
        let _entered = span.enter();
        star.net
            .client_mut(index)
            .request_download(placement.id)
            .with_context(|| format!("player{index} could not start its download"))?;
    }
    star.net.run_until_idle();

    let mut report = ScenarioReport::new("transfer", &star);
    let chunks_each = bytes.div_ceil(CHUNK_SIZE);
    report.check(
        format!("{chunks_each} chunks per client"),
        star.sent(Node::Host, MessageKind::SendChunk).len() == chunks_each * clients,
    );
    report.check(
        "every chunk acknowledged",
        star.traffic().get("received_chunk").copied().unwrap_or(0) == chunks_each * clients,
    );
    report.check(
        "every client holds identical bytes",
        star.clients
            .iter()
            .all(|c| c.store.bytes(&placement.checksum).as_deref() == Some(content.as_slice())),
    );
    report.check(
        "every client rendered the placement",
        star.clients
            .iter()
            .all(|c| c.renderer.rendered(&placement.id).is_some()),
    );
    Ok(report)
}

/// Every client requests the modify lock at once; the winner moves the placement
pub fn run_modify_race(host: &HostConfig, clients: usize) -> anyhow::Result<ScenarioReport> {
    info!("=== Running modify race scenario ===");
    if clients == 0 {
        bail!("the modify race needs at least one client");
    }
    let mut star = StarTopology::with_clients(host, clients)?;
    let placement = star.publish(artifact(2_000, 7), "castle.litematic")?;
    star.net.run_until_idle();
    star.net.clear_frames();

    for index in 0..clients {
        star.net.client_mut(index).request_modify(placement.id)?;
    }
    star.net.run_until_idle();

    let accepts = star.sent(Node::Host, MessageKind::ModifyAccept).len();
    let denies = star.sent(Node::Host, MessageKind::ModifyDeny).len();
    let winner = (0..clients).find(|&i| star.net.client_mut(i).holds_modify_lock(placement.id));
    let Some(winner) = winner else {
        bail!("no client holds the modify lock");
    };
    info!(winner = %star.clients[winner].name, "modify lock granted");

    let moved = PlacementOrigin::new(BlockPos::new(128, 70, -64), "minecraft:overworld")
        .with_rotation(Rotation::Clockwise180);
    star.net.client_mut(winner).finish_modify(placement.id, moved.clone())?;
    star.net.run_until_idle();

    let mut report = ScenarioReport::new("modify-race", &star);
    report.check("exactly one accept", accepts == 1);
    report.check(format!("{} denies", clients - 1), denies == clients - 1);
    report.check(
        "losers were notified",
        star.clients
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != winner)
            .all(|(_, c)| !c.errors().is_empty()),
    );
    report.check(
        "host lock released",
        star.net.host().context().locks.is_empty(),
    );
    report.check(
        "new origin visible everywhere",
        std::iter::once(&star.host)
            .chain(star.clients.iter())
            .all(|p| p.knows(&placement).is_some_and(|known| known.origin == moved)),
    );
    Ok(report)
}

/// One client downloads `attempts` artifacts of `bytes` from a host limited to `limit`
pub fn run_quota(
    host: &HostConfig,
    limit: u64,
    bytes: usize,
    attempts: usize,
) -> anyhow::Result<ScenarioReport> {
    info!("=== Running quota scenario ===");
    if bytes == 0 {
        bail!("quota scenario needs non-empty artifacts");
    }
    let config = host.clone().with_protocol(ProtocolConfig {
        quota: QuotaConfig {
            enabled: true,
            limit,
        },
        ..host.protocol.clone()
    });
    let mut star = StarTopology::with_clients(&config, 1)?;
    let placements = (0..attempts)
        .map(|n| star.publish(artifact(bytes, n as u8), &format!("part{n}.litematic")))
        .collect::<Result<Vec<_>, _>>()?;
    star.net.run_until_idle();
    star.net.clear_frames();

    for placement in &placements {
        star.net.client_mut(0).request_download(placement.id)?;
        star.net.run_until_idle();
    }

    let served = placements
        .iter()
        .filter(|p| star.clients[0].store.bytes(&p.checksum).is_some())
        .count();
    let expected = attempts.min(limit.div_ceil(bytes as u64) as usize);
    info!(served, expected, "quota scenario finished");

    let mut report = ScenarioReport::new("quota", &star);
    report.check(format!("{expected} of {attempts} downloads served"), served == expected);
    if expected < attempts {
        report.check(
            "client told about the exhausted quota",
            star.clients[0].errors().iter().any(|e| e.contains("quota")),
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_scenario() {
        let report = run_handshake(&HostConfig::default(), 3, true).unwrap();
        assert!(report.passed(), "{}", report.render());
        assert_eq!(report.traffic["confirm_user"], 3);
    }

    #[test]
    fn test_transfer_scenario() {
        let report = run_transfer(&HostConfig::default(), 2, 40_000).unwrap();
        assert!(report.passed(), "{}", report.render());
        assert_eq!(report.traffic["send_chunk"], 6);
        assert_eq!(report.traffic["finished_transfer"], 2);
    }

    #[test]
    fn test_modify_race_scenario() {
        let report = run_modify_race(&HostConfig::default(), 4).unwrap();
        assert!(report.passed(), "{}", report.render());
    }

    #[test]
    fn test_modify_race_needs_a_client() {
        assert!(run_modify_race(&HostConfig::default(), 0).is_err());
    }

    #[test]
    fn test_quota_scenario() {
        let report = run_quota(&HostConfig::default(), 50_000, 20_000, 5).unwrap();
        assert!(report.passed(), "{}", report.render());
        assert_eq!(report.checks[0].label, "3 of 5 downloads served");
    }

    #[test]
    fn test_report_renders_failures() {
        let star = StarTopology::new(&HostConfig::default());
        let mut report = ScenarioReport::new("empty", &star);
        report.check("impossible", false);
        assert!(!report.passed());
        assert!(report.render().contains("[FAIL] impossible"));
    }
}
