use super::Runtime;

#[derive(Clone, Debug, clap::Args)]
pub struct Prime {}

impl Prime {
    pub async fn execute(self, runtime: Runtime) -> Result<(), String> {
        runtime.resolver.ensure_primed().await;
        if runtime.cache.is_primed() {
            println!("primed ok");
            Ok(())
        } else {
            Err("priming failed; continuing on root hints".to_string())
        }
    }
}
