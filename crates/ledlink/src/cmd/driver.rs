use std::sync::Arc;

use ledlink_driver::{
    ConfigurationStore, Driver, DriverConfig, JsonFileStore, LoggingBackend, MemoryStore,
};
use tracing::info;

use crate::cmd::DriverArgs;
use crate::exit::{driver_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: DriverArgs) -> CliResult<i32> {
    let config = match &args.config {
        Some(path) => DriverConfig::from_json_file(path)
            .map_err(|err| driver_error("driver config", err))?,
        None => DriverConfig::default(),
    };
    let store: Arc<dyn ConfigurationStore> = match &args.store {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };

    let driver = Arc::new(
        Driver::new(config, Arc::new(LoggingBackend), store)
            .map_err(|err| driver_error("driver setup failed", err))?,
    );
    let listener = driver
        .bind(args.addr.as_str())
        .map_err(|err| driver_error("bind failed", err))?;
    install_ctrlc_handler(Arc::clone(&driver))?;

    // The bound address goes to stdout so callers can bind port 0.
    println!("{}", listener.local_addr());
    if let Some(token) = driver.concurrency_token() {
        info!(%token, "serving stored configuration");
    }

    driver
        .run(&listener)
        .map_err(|err| driver_error("accept failed", err))?;
    Ok(SUCCESS)
}

fn install_ctrlc_handler(driver: Arc<Driver>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        info!("interrupted, turning strips off");
        driver.shutdown();
        std::process::exit(SUCCESS);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
