use anyhow::Result;
use clap::{App, Arg};
use std::path::Path;
use std::sync::Arc;
use foreman::{Config, Registry, Tools, WorkerPool};

#[tokio::main]
pub async fn main() -> Result<()> {

    let options = App::new("foreman")
        .version("1.0")
        .about("Foreman runs schema-driven reconciliation tasks as a long-running service. Clients connect over the /events stream, upload data files, and start tasks which compare two sides of tabular records and report mismatch issues. Refer to the README.md for more details.")
        .arg(Arg::with_name("config")
            .help("Path to an optional yaml configuration file. Defaults apply for any key not present")
            .required(false)
            .takes_value(true))
        .get_matches();

    dotenv::dotenv().ok();
    let _ = env_logger::try_init();

    let config = Arc::new(Config::load(options.value_of("config").map(Path::new))?);
    let registry = Arc::new(Registry::new());
    let pool = Arc::new(WorkerPool::start(config.clone(), registry.clone()));
    let tools = Arc::new(Tools::new(config.clone(), registry, pool));

    foreman::transport::serve(&config, tools).await
}
