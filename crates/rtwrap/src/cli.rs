//! Command line options

use std::path::PathBuf;

use clap::Parser;

use rtwrap_core::audio::BackendKind;

/// Run a processing unit as a real-time audio client
#[derive(Parser, Debug)]
#[command(name = "rtwrap", version, about, long_about = None)]
pub struct Cli {
    /// Client name registered with the audio server
    #[arg(short = 'j', long = "jack-name", value_name = "NAME")]
    pub client_name: Option<String>,

    /// Set a control input before activation (repeatable)
    #[arg(short = 'p', long = "port", value_name = "IDX:VAL", value_parser = parse_port_value)]
    pub ports: Vec<(usize, f32)>,

    /// Print the unit's control inputs and exit
    #[arg(short = 'P', long = "portlist")]
    pub portlist: bool,

    /// List the built-in units and exit
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Headless: don't print control output changes
    #[arg(short = 'G', long = "nogui")]
    pub nogui: bool,

    /// Config file (default: ~/.config/rtwrap/config.yaml)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Audio backend (jack or dummy)
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<BackendKind>,

    /// Connect to physical ports: 1 = audio in, 2 = audio out, 4 = MIDI in
    #[arg(short = 'a', long, value_name = "MASK")]
    pub autoconnect: Option<u8>,

    /// Render offline to a WAV file instead of running live
    #[arg(long, value_name = "OUT.wav")]
    pub render: Option<PathBuf>,

    /// WAV file fed to the unit's inputs while rendering
    #[arg(long, value_name = "IN.wav", requires = "render")]
    pub input: Option<PathBuf>,

    /// Render length when no input file is given
    #[arg(long, value_name = "SECONDS", default_value_t = 10.0)]
    pub seconds: f32,

    /// Unit to run: index or part of its URI/name (default: first)
    #[arg(value_name = "UNIT")]
    pub unit: Option<String>,
}

/// Parse `index:value`
fn parse_port_value(s: &str) -> Result<(usize, f32), String> {
    let (index, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected IDX:VAL, got '{}'", s))?;
    let index = index
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("bad port index '{}': {}", index, e))?;
    let value = value
        .trim()
        .parse::<f32>()
        .map_err(|e| format!("bad value '{}': {}", value, e))?;
    Ok((index, value))
}
