//! lio-backstore resource agent
//!
//! Manages a LIO backstore and storage object, optionally as a promotable
//! clone driving ALUA state.

use clap::Parser;
use env_logger::Env;
use std::process;

use lio_agents::agent::{BackstoreAgent, Services};
use lio_agents::ocf::{dispatch, Action, OcfEnv, OcfStatus};
use lio_agents::Config;

#[derive(Parser, Debug)]
#[command(name = "lio-backstore")]
#[command(about = "OCF resource agent for a LIO backstore", long_about = None)]
struct Args {
    /// OCF action to perform
    #[arg(value_enum)]
    action: Action,
}

fn main() {
    let args = Args::parse();
    let env = OcfEnv::from_env();

    let config = match Config::discover() {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("lio-backstore: invalid settings: {}", e);
            None
        }
    };

    let level = match (&config, env.debug) {
        (_, true) => "debug".to_string(),
        (Some(config), false) => config.logging.level.clone(),
        (None, false) => "info".to_string(),
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let config = match config {
        Some(config) => config,
        // Metadata does not depend on the settings
        None if matches!(args.action, Action::MetaData | Action::Usage) => Config::default(),
        None => process::exit(OcfStatus::ConfiguredError.code()),
    };

    log::debug!(
        "{:?} on {}",
        args.action,
        env.resource_instance.as_deref().unwrap_or("lio-backstore")
    );

    let services = Services::system(&config);
    let agent = BackstoreAgent::new(env, config, services);
    let status = dispatch(&agent, args.action, &mut std::io::stdout());

    process::exit(status.code());
}
