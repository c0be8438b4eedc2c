//! Static peer-table parsing (§1: "device-address registry lookup ...
//! treated as an opaque name→address map"). The compiler/shell layers that
//! would populate a richer registry are out of scope; this binary crate
//! reads a fixed table from the environment, the same CLI-arg/env-var
//! resolution style as `RuntimeConfig::from_env_and_args`.

use mesh_rt_core::resolve::StaticDeviceRegistry;

/// Parse `MESH_RT_PEERS="A=tcp://10.0.0.1:5557,B=tcp://10.0.0.2:5557"` into
/// a [`StaticDeviceRegistry`]. Missing or malformed entries are skipped
/// with a warning rather than failing startup.
pub fn peers_from_env() -> StaticDeviceRegistry {
    let mut registry = StaticDeviceRegistry::new();
    let Ok(raw) = std::env::var("MESH_RT_PEERS") else {
        return registry;
    };
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once('=') {
            Some((device, addr)) if !device.is_empty() && !addr.is_empty() => {
                registry.insert(device.to_string(), addr.to_string());
            }
            _ => tracing::warn!(entry, "ignoring malformed MESH_RT_PEERS entry"),
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_well_formed_entries() {
        std::env::set_var("MESH_RT_PEERS", "A=tcp://10.0.0.1:5557,B=tcp://10.0.0.2:5557");
        let registry = peers_from_env();
        assert_eq!(
            registry.resolve("A").await,
            Some("tcp://10.0.0.1:5557".to_string())
        );
        assert_eq!(
            registry.resolve("B").await,
            Some("tcp://10.0.0.2:5557".to_string())
        );
        std::env::remove_var("MESH_RT_PEERS");
    }

    #[tokio::test]
    async fn absent_env_var_yields_empty_registry() {
        std::env::remove_var("MESH_RT_PEERS");
        let registry = peers_from_env();
        assert_eq!(registry.resolve("A").await, None);
    }
}
