//! Runtime configuration
//!
//! Values come from a `.env` file (if present), then `BENOR_*` environment
//! variables, then positional command line arguments.

use crate::consensus::{PeerId, ProtocolParams, Value, DEFAULT_ROUND_BUDGET};
use crate::error::ConfigError;
use crate::orchestrator::DecisionPolicy;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port of `peer` when peers listen on consecutive ports from `base_port`.
pub fn peer_port(base_port: u16, peer: PeerId) -> Option<u16> {
    u16::try_from(peer)
        .ok()
        .and_then(|offset| base_port.checked_add(offset))
}

fn check_port_range(base_port: u16, total_nodes: usize) -> Result<(), ConfigError> {
    match total_nodes.checked_sub(1) {
        Some(last) if peer_port(base_port, last).is_none() => Err(ConfigError::Inconsistent(format!(
            "{} peers do not fit above base port {}",
            total_nodes, base_port
        ))),
        _ => Ok(()),
    }
}

/// Settings for one peer process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub node_id: PeerId,
    pub params: ProtocolParams,
    pub host: String,
    pub base_port: u16,
    pub port: u16,
    pub initial_value: Value,
    pub faulty: bool,
    /// Makes coin flips reproducible when set.
    pub seed: Option<u64>,
    pub http_workers: usize,
    pub request_timeout: Duration,
}

/// Settings for driving a running cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub total_nodes: usize,
    pub host: String,
    pub base_port: u16,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub policy: DecisionPolicy,
    pub request_timeout: Duration,
}

/// Key/value source, so tests do not have to touch the process environment.
trait Lookup {
    fn get(&self, key: &'static str) -> Option<String>;

    fn parse<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { key, value: raw }),
        }
    }

    fn require<T: FromStr>(&self, key: &'static str) -> Result<T, ConfigError> {
        self.parse(key)?.ok_or(ConfigError::Missing(key))
    }
}

impl<F: Fn(&'static str) -> Option<String>> Lookup for F {
    fn get(&self, key: &'static str) -> Option<String> {
        self(key)
    }
}

fn parse_value(key: &'static str, raw: &str) -> Result<Value, ConfigError> {
    raw.trim()
        .parse::<u8>()
        .ok()
        .and_then(|bit| Value::try_from(bit).ok())
        .ok_or_else(|| ConfigError::Invalid {
            key,
            value: raw.to_string(),
        })
}

fn parse_id_list(key: &'static str, raw: &str) -> Result<Vec<PeerId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| ConfigError::Invalid {
                key,
                value: raw.to_string(),
            })
        })
        .collect()
}

fn millis(lookup: &impl Lookup, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(lookup.parse(key)?.unwrap_or(default)))
}

impl NodeConfig {
    /// Loads `.env`, the environment and `args` (without the program name):
    /// `[node_id] [port]`.
    pub fn load(args: &[String]) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key: &'static str| std::env::var(key).ok(), args)
    }

    fn from_lookup(lookup: impl Lookup, args: &[String]) -> Result<Self, ConfigError> {
        let total_nodes: usize = lookup.require("BENOR_NODES")?;
        let faulty_ids = match lookup.get("BENOR_FAULTY") {
            Some(raw) => parse_id_list("BENOR_FAULTY", &raw)?,
            None => Vec::new(),
        };
        let max_faulty = lookup.parse("BENOR_FAULTS")?.unwrap_or(faulty_ids.len());
        let round_budget = lookup
            .parse("BENOR_ROUND_BUDGET")?
            .unwrap_or(DEFAULT_ROUND_BUDGET);

        let node_id: PeerId = match args.first() {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "node_id",
                value: raw.clone(),
            })?,
            None => lookup.require("BENOR_NODE_ID")?,
        };

        let base_port = lookup.parse("BENOR_BASE_PORT")?.unwrap_or(DEFAULT_BASE_PORT);
        let port = match args.get(1) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "port",
                value: raw.clone(),
            })?,
            None => peer_port(base_port, node_id)
                .ok_or_else(|| ConfigError::Inconsistent(format!("no port for node {}", node_id)))?,
        };

        let initial_value = match lookup.get("BENOR_INITIAL_VALUES") {
            Some(raw) => {
                let values: Vec<&str> = raw.split(',').collect();
                let entry = values.get(node_id).ok_or_else(|| {
                    ConfigError::Inconsistent(format!(
                        "BENOR_INITIAL_VALUES has {} entries, node id is {}",
                        values.len(),
                        node_id
                    ))
                })?;
                parse_value("BENOR_INITIAL_VALUES", entry)?
            }
            None => {
                let raw = lookup
                    .get("BENOR_INITIAL_VALUE")
                    .ok_or(ConfigError::Missing("BENOR_INITIAL_VALUE"))?;
                parse_value("BENOR_INITIAL_VALUE", &raw)?
            }
        };

        let config = NodeConfig {
            node_id,
            params: ProtocolParams::new(total_nodes, max_faulty).with_round_budget(round_budget),
            host: lookup.get("BENOR_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            base_port,
            port,
            initial_value,
            faulty: faulty_ids.contains(&node_id),
            seed: lookup.parse("BENOR_SEED")?,
            http_workers: lookup.parse("BENOR_HTTP_WORKERS")?.unwrap_or(2),
            request_timeout: millis(&lookup, "BENOR_REQUEST_TIMEOUT_MS", 5_000)?,
        };
        config.validate(&faulty_ids)?;
        Ok(config)
    }

    fn validate(&self, faulty_ids: &[PeerId]) -> Result<(), ConfigError> {
        let n = self.params.total_nodes;
        if n == 0 {
            return Err(ConfigError::Inconsistent("BENOR_NODES must be at least 1".into()));
        }
        if self.params.max_faulty >= n {
            return Err(ConfigError::Inconsistent(format!(
                "BENOR_FAULTS ({}) must be below BENOR_NODES ({})",
                self.params.max_faulty, n
            )));
        }
        check_port_range(self.base_port, n)?;
        if self.node_id >= n {
            return Err(ConfigError::Inconsistent(format!(
                "node id {} outside [0, {})",
                self.node_id, n
            )));
        }
        if let Some(bad) = faulty_ids.iter().find(|&&id| id >= n) {
            return Err(ConfigError::Inconsistent(format!(
                "faulty peer {} outside [0, {})",
                bad, n
            )));
        }
        if faulty_ids.len() > self.params.max_faulty {
            return Err(ConfigError::Inconsistent(format!(
                "{} faulty peers listed but BENOR_FAULTS is {}",
                faulty_ids.len(),
                self.params.max_faulty
            )));
        }
        Ok(())
    }
}

impl OrchestratorConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key: &'static str| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Lookup) -> Result<Self, ConfigError> {
        let total_nodes: usize = lookup.require("BENOR_NODES")?;
        if total_nodes == 0 {
            return Err(ConfigError::Inconsistent("BENOR_NODES must be at least 1".into()));
        }
        let policy = match lookup.get("BENOR_DECISION_POLICY").as_deref() {
            None | Some("exclude_faulty") => DecisionPolicy::ExcludeFaulty,
            Some("require_all") => DecisionPolicy::RequireAll,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "BENOR_DECISION_POLICY",
                    value: other.to_string(),
                })
            }
        };

        let base_port = lookup.parse("BENOR_BASE_PORT")?.unwrap_or(DEFAULT_BASE_PORT);
        check_port_range(base_port, total_nodes)?;

        Ok(OrchestratorConfig {
            total_nodes,
            host: lookup.get("BENOR_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            base_port,
            poll_interval: millis(&lookup, "BENOR_POLL_INTERVAL_MS", 200)?,
            timeout: millis(&lookup, "BENOR_CONSENSUS_TIMEOUT_MS", 30_000)?,
            policy,
            request_timeout: millis(&lookup, "BENOR_REQUEST_TIMEOUT_MS", 5_000)?,
        })
    }
}
