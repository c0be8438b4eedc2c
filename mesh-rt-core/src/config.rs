//! Runtime configuration (§6, §9 "Runtime context struct" design note).
//!
//! Resolution order mirrors `bpmn-lite-server/src/main.rs::parse_database_url`:
//! a CLI flag takes precedence over an environment variable, which takes
//! precedence over a compiled-in default.

use crate::transport::{DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY};

/// Process-wide settings for one device runtime. Threaded explicitly
/// through every component instead of living as ambient module state
/// (§9).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// This device's name, used to key system events/reactors (§4.G) and
    /// stamped into every outbound message's `src.dev` field.
    pub device_name: String,
    /// TCP port the listener binds (§6).
    pub port: u16,
    /// Capacity of every bounded queue: input, output, and event (§3.5).
    pub queue_capacity: usize,
    /// Maximum VM value-stack depth (§3.4).
    pub stack_limit: usize,
    /// Explicit self-address override, bypassing interface enumeration.
    /// Needed in containers/tests lacking `eth0`/`wlan0` (§10.6, DESIGN.md
    /// Open Question resolution 5).
    pub self_addr_override: Option<String>,
}

impl RuntimeConfig {
    /// Build a config from `--device-name`/`--port`/`--queue-capacity`/
    /// `--stack-limit`/`--self-addr` CLI args, falling back to
    /// `MESH_RT_DEVICE_NAME`/`MESH_RT_PORT`/`MESH_RT_QUEUE_CAPACITY`/
    /// `MESH_RT_STACK_LIMIT`/`MESH_RT_SELF_ADDR` env vars, falling back to
    /// defaults.
    pub fn from_env_and_args(args: &[String]) -> Self {
        let device_name = cli_or_env(args, "--device-name", "MESH_RT_DEVICE_NAME")
            .unwrap_or_else(|| "device".to_string());
        let port = cli_or_env(args, "--port", "MESH_RT_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let queue_capacity = cli_or_env(args, "--queue-capacity", "MESH_RT_QUEUE_CAPACITY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let stack_limit = cli_or_env(args, "--stack-limit", "MESH_RT_STACK_LIMIT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(4096);
        let self_addr_override = cli_or_env(args, "--self-addr", "MESH_RT_SELF_ADDR");

        RuntimeConfig {
            device_name,
            port,
            queue_capacity,
            stack_limit,
            self_addr_override,
        }
    }

    pub fn for_test(device_name: impl Into<String>) -> Self {
        RuntimeConfig {
            device_name: device_name.into(),
            port: 0,
            queue_capacity: 64,
            stack_limit: 256,
            self_addr_override: Some("tcp://127.0.0.1:0".to_string()),
        }
    }
}

fn cli_or_env(args: &[String], flag: &str, env_var: &str) -> Option<String> {
    if let Some(v) = args
        .windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
    {
        return Some(v);
    }
    std::env::var(env_var).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flag_overrides_default() {
        let args: Vec<String> = vec!["--device-name".into(), "A".into()];
        let cfg = RuntimeConfig::from_env_and_args(&args);
        assert_eq!(cfg.device_name, "A");
        assert_eq!(cfg.port, DEFAULT_PORT);
    }

    #[test]
    fn defaults_used_when_nothing_set() {
        let cfg = RuntimeConfig::from_env_and_args(&[]);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }
}
