//! Adapters command implementation.

use provd_core::Registry;
use provd_server::ServerConfig;

/// Prints every adapter of `registry` with its root and map file.
pub fn run(config: &ServerConfig, registry: &Registry) {
    println!("instance: {}", config.instance.name());
    println!("data dir: {}", config.data_dir.display());
    for adapter in registry.iter() {
        println!(
            "  {:<10} {:<24} {}",
            adapter.name(),
            adapter.root(),
            config.map_file_path(adapter.name()).display()
        );
    }
}
