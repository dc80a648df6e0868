use tdns_api::{ServerStatusEntry, StatusResult, ZoneStatusEntry};

use super::Runtime;

#[derive(Clone, Debug, clap::Args)]
pub struct Status {}

impl Status {
    pub async fn execute(self, runtime: Runtime) -> Result<(), String> {
        let mut zones = Vec::new();
        for zone in runtime.registry.zone_names() {
            let entry = runtime.registry.zone_entry(&zone);
            let servers: Vec<ServerStatusEntry> = entry
                .servers
                .lock()
                .unwrap()
                .values()
                .map(|server| ServerStatusEntry {
                    name: server.name.parse().unwrap_or_else(|_| ".".parse().unwrap()),
                    addresses: server.addresses(),
                    conn_mode: format!("{:?}", server.conn_mode()),
                    debug: server.debug(),
                })
                .collect();
            zones.push(ZoneStatusEntry { zone, servers });
        }

        let result = StatusResult { primed: runtime.cache.is_primed(), zones };

        println!("primed: {}", result.primed);
        for zone in &result.zones {
            println!("zone {}:", zone.zone);
            for server in &zone.servers {
                println!("  {} [{}]  addrs={:?}  debug={}", server.name, server.conn_mode, server.addresses, server.debug);
            }
        }
        Ok(())
    }
}
