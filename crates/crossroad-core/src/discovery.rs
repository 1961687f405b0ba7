//! Engine discovery and the attach-retry loop.
//!
//! The relay does not launch the simulation engine; it waits for one
//! to appear, extracts the control port the engine published on its
//! command line, and attaches as a secondary client. Discovery is a
//! capability seam ([`DiscoveryBackend`]) so tests can script "the
//! process appears after N polls" without a process table.
//!
//! Nothing on this path is an error: an empty scan and a refused
//! handshake are both "not ready yet", logged at `debug!` and retried
//! at the configured interval, forever. The relay's job is to outwait
//! the environment.

use std::time::Duration;

use tracing::{debug, info};

use crate::session::SessionError;

/// A candidate engine process found by a discovery scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCandidate {
    /// Process id of the engine.
    pub pid: u32,
    /// Control port extracted from the engine's invocation arguments.
    pub port: u16,
}

/// A source of engine candidates.
///
/// Implementations scan whatever environment they know about and
/// return zero or more candidates per poll. The production backend is
/// [`ProcScanDiscovery`]; [`ScriptedDiscovery`] serves tests.
pub trait DiscoveryBackend {
    /// Scan once. An empty result means "no engine yet".
    fn scan(&mut self) -> Vec<EngineCandidate>;
}

/// Discovery backend that scans `/proc/*/cmdline` for a running
/// engine process.
///
/// A process qualifies when its executable name matches one of the
/// configured names, its arguments publish a `--remote-port`, and --
/// when a scenario path is configured -- its arguments reference that
/// scenario. The scenario filter keeps the relay from attaching to an
/// unrelated engine on a busy host.
#[derive(Debug, Clone)]
pub struct ProcScanDiscovery {
    process_names: Vec<String>,
    scenario: Option<String>,
}

impl ProcScanDiscovery {
    /// Scan for the given executable names (for example `sumo`, or
    /// `sumo-gui` for the visual engine variant).
    pub fn new(process_names: Vec<String>) -> Self {
        Self {
            process_names,
            scenario: None,
        }
    }

    /// Only accept candidates whose command line references this
    /// scenario file.
    #[must_use]
    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    fn candidate_from_cmdline(&self, pid: u32, cmdline: &str) -> Option<EngineCandidate> {
        let args: Vec<&str> = cmdline.split('\0').filter(|a| !a.is_empty()).collect();
        let exe = args.first()?;
        let exe_name = exe.rsplit('/').next().unwrap_or(exe);
        if !self.process_names.iter().any(|n| n == exe_name) {
            return None;
        }

        if let Some(ref scenario) = self.scenario {
            if !args.iter().any(|a| a.contains(scenario.as_str())) {
                return None;
            }
        }

        let port = args
            .iter()
            .position(|&a| a == "--remote-port")
            .and_then(|i| args.get(i.checked_add(1)?))
            .and_then(|p| p.parse::<u16>().ok())?;

        Some(EngineCandidate { pid, port })
    }
}

impl DiscoveryBackend for ProcScanDiscovery {
    fn scan(&mut self) -> Vec<EngineCandidate> {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(pid) = name.to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(cmdline) = std::fs::read_to_string(entry.path().join("cmdline")) else {
                continue;
            };
            if let Some(candidate) = self.candidate_from_cmdline(pid, &cmdline) {
                candidates.push(candidate);
            }
        }
        candidates
    }
}

/// Scripted discovery backend for tests.
///
/// Returns nothing for the first `ready_after` polls, then the
/// configured candidate on every subsequent poll.
#[derive(Debug, Clone)]
pub struct ScriptedDiscovery {
    candidate: EngineCandidate,
    ready_after: u32,
    /// Number of polls performed so far.
    pub polls: u32,
}

impl ScriptedDiscovery {
    /// A backend whose candidate appears after `ready_after` empty
    /// polls.
    pub const fn new(candidate: EngineCandidate, ready_after: u32) -> Self {
        Self {
            candidate,
            ready_after,
            polls: 0,
        }
    }
}

impl DiscoveryBackend for ScriptedDiscovery {
    fn scan(&mut self) -> Vec<EngineCandidate> {
        self.polls = self.polls.saturating_add(1);
        if self.polls > self.ready_after {
            vec![self.candidate.clone()]
        } else {
            Vec::new()
        }
    }
}

/// Poll the backend until a candidate attaches, retrying forever.
///
/// `connect` performs the actual session handshake for a candidate
/// (open the control connection, declare secondary ordering). A
/// failed handshake is "not ready yet" -- logged at `debug!` and
/// retried on the next poll, never surfaced. The first successful
/// handshake transitions the relay to attached exactly once.
pub async fn attach<B, S, F>(backend: &mut B, poll_interval: Duration, mut connect: F) -> S
where
    B: DiscoveryBackend,
    F: FnMut(&EngineCandidate) -> Result<S, SessionError>,
{
    info!("Waiting for a simulation engine to appear");
    loop {
        for candidate in backend.scan() {
            match connect(&candidate) {
                Ok(session) => {
                    info!(
                        pid = candidate.pid,
                        port = candidate.port,
                        "Attached to simulation engine as secondary client"
                    );
                    return session;
                }
                Err(e) => {
                    debug!(
                        pid = candidate.pid,
                        port = candidate.port,
                        error = %e,
                        "Attach attempt failed, will retry"
                    );
                }
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::StubControlSession;

    fn candidate() -> EngineCandidate {
        EngineCandidate {
            pid: 4242,
            port: 52001,
        }
    }

    #[test]
    fn cmdline_parsing_extracts_the_remote_port() {
        let disco = ProcScanDiscovery::new(vec![String::from("sumo")]);
        let cmdline = "/usr/bin/sumo\0-c\0cross.sumocfg\0--remote-port\052001\0--start\0";
        let found = disco.candidate_from_cmdline(7, cmdline).unwrap();
        assert_eq!(found, EngineCandidate { pid: 7, port: 52001 });
    }

    #[test]
    fn non_matching_name_or_missing_port_is_skipped() {
        let disco = ProcScanDiscovery::new(vec![String::from("sumo")]);
        assert!(disco
            .candidate_from_cmdline(1, "/usr/bin/vim\0--remote-port\0123\0")
            .is_none());
        assert!(disco
            .candidate_from_cmdline(2, "/usr/bin/sumo\0-c\0cross.sumocfg\0")
            .is_none());
        assert!(disco
            .candidate_from_cmdline(3, "/usr/bin/sumo\0--remote-port\0notaport\0")
            .is_none());
    }

    #[test]
    fn scenario_filter_rejects_other_engines() {
        let disco = ProcScanDiscovery::new(vec![String::from("sumo")])
            .with_scenario("cross.sumocfg");
        let other = "/usr/bin/sumo\0-c\0grid.sumocfg\0--remote-port\052001\0";
        assert!(disco.candidate_from_cmdline(1, other).is_none());
        let ours = "/usr/bin/sumo\0-c\0scenarios/cross.sumocfg\0--remote-port\052001\0";
        assert!(disco.candidate_from_cmdline(2, ours).is_some());
    }

    #[tokio::test]
    async fn attach_succeeds_on_the_poll_after_the_engine_appears() {
        let mut backend = ScriptedDiscovery::new(candidate(), 3);

        let session = attach(&mut backend, Duration::ZERO, |c| {
            assert_eq!(c.port, 52001);
            Ok(StubControlSession::running_for(1, Vec::new()))
        })
        .await;

        // Three empty polls, then success on the fourth.
        assert_eq!(backend.polls, 4);
        drop(session);
    }

    #[tokio::test]
    async fn refused_handshake_is_retried_until_it_succeeds() {
        let mut backend = ScriptedDiscovery::new(candidate(), 0);
        let mut attempts = 0_u32;

        let _session = attach(&mut backend, Duration::ZERO, |_| {
            attempts += 1;
            if attempts < 3 {
                Err(SessionError::Rejected {
                    message: String::from("ordering conflict"),
                })
            } else {
                Ok(StubControlSession::running_for(1, Vec::new()))
            }
        })
        .await;

        assert_eq!(attempts, 3);
    }
}
