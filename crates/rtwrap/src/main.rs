//! rtwrap - run a processing unit as a real-time audio client
//!
//! This is the entry point for the standalone host. It:
//! 1. Loads the YAML config and applies command line overrides
//! 2. Instantiates the selected unit and resolves initial control values
//! 3. Either renders offline (`--render`) or starts the audio backend and
//!    runs the control loop on the main thread until Ctrl-C or `quit`
//!
//! Set RUST_LOG=debug for verbose output.

mod cli;
mod config;
mod console;
mod render;
mod signals;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;

use rtwrap_core::audio::{AudioBackend, AutoConnect, StopFlag};
use rtwrap_core::engine::HostBuilder;
use rtwrap_core::plugin::{PortKind, UnitDescriptor};
use rtwrap_core::units;
use rtwrap_core::urid::{UriMap, Urids};

use cli::Cli;
use config::HostConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if cli.list {
        for (index, info) in units::catalog().iter().enumerate() {
            println!("{:>3}  {:<10} {}", index, info.name, info.uri);
        }
        return Ok(());
    }

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let mut config = config::load_config(&config_path);
    if !config_path.exists() {
        // First run: leave an editable file behind
        if let Err(e) = config::save_config(&config, &config_path) {
            log::warn!("Could not write default config: {:#}", e);
        }
    }
    apply_overrides(&mut config, &cli);

    let info = units::find(cli.unit.as_deref())?;
    let mut uri_map = UriMap::new();
    let urids = Urids::new(&mut uri_map);
    let unit = info.instantiate(&urids);
    let descriptor = unit.descriptor().clone();

    if cli.portlist {
        print_ports(&descriptor);
        return Ok(());
    }

    let controls = initial_controls(&descriptor, &config, &cli.ports)?;

    if let Some(output) = &cli.render {
        let input = cli.input.as_deref().map(render::read_input).transpose()?;
        let sample_rate = input
            .as_ref()
            .map(|audio| audio.sample_rate)
            .unwrap_or(config.audio.sample_rate);
        let frames = match &input {
            Some(audio) => audio.frames(),
            None => (cli.seconds.max(0.0) * sample_rate as f32) as usize,
        };

        let mut builder = HostBuilder::new(unit, urids).with_update_ratio(config.update_ratio);
        for &(port, value) in &controls {
            builder = builder.with_control(port, value);
        }
        let mut host = builder.build(sample_rate).context("Failed to activate unit")?;

        let result = render::render(
            &mut host,
            sample_rate,
            config.audio.period as usize,
            input.as_ref(),
            frames,
            output,
        );
        host.driver.take_unit();
        if let Some(worker) = host.worker.take() {
            worker.shutdown();
        }
        result?;
        return Ok(());
    }

    run_live(unit, urids, descriptor, &config, &controls, cli.nogui)
}

fn apply_overrides(config: &mut HostConfig, cli: &Cli) {
    if let Some(name) = &cli.client_name {
        config.audio.client_name = name.clone();
    }
    if let Some(backend) = cli.backend {
        config.audio.backend = backend;
    }
    if let Some(mask) = cli.autoconnect {
        config.audio.autoconnect = AutoConnect::from_mask(mask);
    }
}

/// Config values (by name) first, then `-p idx:val` on top
fn initial_controls(
    descriptor: &UnitDescriptor,
    config: &HostConfig,
    overrides: &[(usize, f32)],
) -> Result<Vec<(usize, f32)>> {
    let mut controls = Vec::new();
    for (name, &value) in &config.controls {
        let Some(port) = descriptor.port_index(name) else {
            log::warn!("Config sets unknown control '{}', ignoring", name);
            continue;
        };
        descriptor
            .check_control_value(port, value)
            .with_context(|| format!("Invalid config value for '{}'", name))?;
        controls.push((port, value));
    }
    for &(port, value) in overrides {
        descriptor
            .check_control_value(port, value)
            .with_context(|| format!("Invalid --port {}:{}", port, value))?;
        controls.push((port, value));
    }
    Ok(controls)
}

fn print_ports(descriptor: &UnitDescriptor) {
    println!("{} <{}>", descriptor.name, descriptor.uri);
    for (index, port) in descriptor.ports_of(PortKind::ControlIn) {
        println!(
            "  {:>3} {:<12} default {:<8} [{} .. {}]  {}",
            index, port.name, port.default, port.min, port.max, port.doc
        );
    }
}

fn run_live(
    unit: Box<dyn rtwrap_core::plugin::ProcessingUnit>,
    urids: Urids,
    descriptor: UnitDescriptor,
    config: &HostConfig,
    controls: &[(usize, f32)],
    nogui: bool,
) -> Result<()> {
    let stop = StopFlag::new();
    signals::install(&stop);
    signals::lock_memory();

    let backend = AudioBackend::open(&config.audio).context("Failed to open audio backend")?;
    let sample_rate = backend.sample_rate();

    let mut builder = HostBuilder::new(unit, urids)
        .with_update_ratio(config.update_ratio)
        .with_surface();
    for &(port, value) in controls {
        builder = builder.with_control(port, value);
    }
    let mut host = builder.build(sample_rate).context("Failed to activate unit")?;

    let surface = host.surface.take();
    let handle = backend
        .start(host.driver, host.latency, stop.clone())
        .context("Failed to start audio")?;
    log::info!(
        "'{}' running as '{}' ({}Hz, {} frames, {:.1}ms)",
        descriptor.name,
        handle.client_name(),
        handle.sample_rate(),
        handle.buffer_size(),
        handle.latency_ms()
    );

    if let Some(surface) = surface {
        // Detached: a thread blocked on stdin must not hold up shutdown
        console::spawn(surface, descriptor.clone(), stop.clone())?;
    }

    let mut monitor = ui::PortMonitor::new(&descriptor, !nogui);
    ui::run(&handle, &mut host.ui, &mut monitor, &urids, config.ui_fps, &stop);

    log::info!("Shutting down");
    for (index, port) in descriptor.ports_of(PortKind::ControlOut) {
        if let Some(value) = monitor.value(index) {
            log::debug!("Last {} = {}", port.name, value);
        }
    }
    if let Some(mut driver) = handle.stop() {
        driver.take_unit();
    }
    if let Some(worker) = host.worker.take() {
        worker.shutdown();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtwrap_core::units::shaper;

    #[test]
    fn test_initial_controls_merge() {
        let d = shaper::descriptor();
        let mut config = HostConfig::default();
        config.controls.insert("drive".to_string(), 2.0);
        config.controls.insert("missing".to_string(), 1.0);

        let controls = initial_controls(&d, &config, &[(shaper::GAIN, 0.5)]).unwrap();
        assert_eq!(controls, vec![(shaper::DRIVE, 2.0), (shaper::GAIN, 0.5)]);

        assert!(initial_controls(&d, &config, &[(shaper::DRIVE, 100.0)]).is_err());
        assert!(initial_controls(&d, &config, &[(shaper::LEVEL, 0.0)]).is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from(["rtwrap", "-j", "other", "--backend", "dummy", "-a", "5"]).unwrap();
        let mut config = HostConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.audio.client_name, "other");
        assert_eq!(config.audio.backend, rtwrap_core::audio::BackendKind::Dummy);
        assert!(config.audio.autoconnect.audio_in);
        assert!(!config.audio.autoconnect.audio_out);
        assert!(config.audio.autoconnect.midi_in);
    }
}
