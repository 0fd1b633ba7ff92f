//! Ember demo application
//!
//! Walks a first-person camera around a small textured scene lit by a ring
//! of orbiting point lights. The configuration path is the first argument,
//! `ember.toml` by default.

mod app;
mod keyboard_movement_controller;

use ember_engine::core::{ApplicationConfig, Config};
use ember_engine::foundation::logging;

use app::App;

const DEFAULT_CONFIG: &str = "ember.toml";

fn main() {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    let config = match ApplicationConfig::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            logging::init();
            log::error!("Failed to load {}: {}", config_path, e);
            std::process::exit(1);
        }
    };
    logging::init_with_level(&config.engine.log_level);

    if let Err(e) = config.validate() {
        log::error!("Invalid configuration in {}: {}", config_path, e);
        std::process::exit(1);
    }

    log::info!("Starting {}", config.window.title);
    if let Err(e) = App::new(&config).and_then(|mut app| app.run()) {
        log::error!("Demo failed: {}", e);
        std::process::exit(1);
    }
}
