pub mod run;
pub mod runs;
pub mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::Result;

use pipeline_rpc::RpcServer;
use pipeline_service::{EngineConfig, FileStore, PipelineExecutor};

/// Options shared by every command
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Engine configuration file (YAML)
    #[arg(long, short = 'c', global = true, env = "PIPELINE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding stored pipelines and run records
    #[arg(long, global = true, env = "PIPELINE_DATA_DIR", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

impl GlobalArgs {
    /// Load the engine config, letting command-line flags win over the file
    pub fn load_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        Ok(config)
    }
}

/// Read-only server over the file store, for querying recorded runs
pub fn query_server(config: EngineConfig) -> RpcServer {
    let store = Arc::new(FileStore::new(&config.data_dir));
    let executor = PipelineExecutor::new(store.clone(), store).with_config(config);
    RpcServer::new(executor)
}
