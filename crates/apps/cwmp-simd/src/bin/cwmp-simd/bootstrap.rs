use super::Args;
use cwmp_sim::{start_with, Simulator};
use cwmp_simd::config::SimulatorConfig;
use cwmp_simd::data_model;

pub(super) struct BootstrapContext {
    pub(super) simulators: Vec<Simulator>,
}

fn resolve_config(args: Args) -> SimulatorConfig {
    let mut config = match args.config.as_ref() {
        Some(path) => SimulatorConfig::from_path(path).expect("load config"),
        None => SimulatorConfig::default(),
    };
    if args.acs_url.is_some() {
        config.acs_url = args.acs_url;
    }
    if args.serial_number.is_some() {
        config.serial_number = args.serial_number;
    }
    if args.data_model.is_some() {
        config.data_model = args.data_model;
    }
    if args.devices.is_some() {
        config.devices = args.devices;
    }
    if args.request_timeout_secs.is_some() {
        config.request_timeout_secs = args.request_timeout_secs;
    }
    if args.default_inform_interval_secs.is_some() {
        config.default_inform_interval_secs = args.default_inform_interval_secs;
    }
    if args.ca_file.is_some() {
        config.ca_file = args.ca_file;
    }
    config
}

pub(super) async fn bootstrap(args: Args) -> BootstrapContext {
    let config = resolve_config(args);
    let acs_url = config.acs_url();
    match config.data_model.as_ref() {
        Some(path) => log::info!("data model {}", path.display()),
        None => log::info!("data model: bundled tr181-minimal"),
    }

    let mut simulators = Vec::new();
    for serial_number in config.device_serials() {
        let store = data_model::load(config.data_model.as_deref()).expect("load data model");
        let simulator = start_with(store, &serial_number, acs_url, config.options())
            .await
            .expect("start simulator");
        log::info!(
            "simulator {} up, connection requests at {}",
            simulator.serial_number(),
            simulator.connection_request_url()
        );
        simulators.push(simulator);
    }
    BootstrapContext { simulators }
}
