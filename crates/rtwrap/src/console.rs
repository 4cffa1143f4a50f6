//! Stdin control surface
//!
//! One command per line:
//!
//! ```text
//! drive 2.5        set a control input by name
//! 6 2.5            ... or by port index
//! midi 90 3c 64    send up to three MIDI bytes (hex) to the unit
//! quit             stop the host
//! ```

use std::io::BufRead;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use rtwrap_core::audio::StopFlag;
use rtwrap_core::engine::SurfaceSender;
use rtwrap_core::plugin::{PortKind, UnitDescriptor};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Param { port: usize, value: f32 },
    Midi(Vec<u8>),
    Help,
    Quit,
}

/// Parse one console line against the unit's ports
pub fn parse_command(line: &str, descriptor: &UnitDescriptor) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(None);
    };

    match first {
        "help" | "?" => Ok(Some(Command::Help)),
        "quit" | "exit" => Ok(Some(Command::Quit)),
        "midi" => {
            let bytes = words
                .map(|w| u8::from_str_radix(w, 16).map_err(|_| format!("bad MIDI byte '{}'", w)))
                .collect::<Result<Vec<_>, _>>()?;
            if bytes.is_empty() || bytes.len() > 3 {
                return Err("midi takes 1 to 3 hex bytes".to_string());
            }
            Ok(Some(Command::Midi(bytes)))
        }
        name => {
            let port = name
                .parse::<usize>()
                .ok()
                .or_else(|| descriptor.port_index(name))
                .ok_or_else(|| format!("unknown port '{}'", name))?;
            let value = words
                .next()
                .ok_or_else(|| format!("missing value for '{}'", name))?
                .parse::<f32>()
                .map_err(|e| e.to_string())?;
            descriptor
                .check_control_value(port, value)
                .map_err(|e| e.to_string())?;
            Ok(Some(Command::Param { port, value }))
        }
    }
}

fn print_help(descriptor: &UnitDescriptor) {
    println!("Commands: <port> <value> | midi <hex bytes> | quit");
    for (index, port) in descriptor.ports_of(PortKind::ControlIn) {
        println!("  {:>3} {:<12} [{} .. {}]", index, port.name, port.min, port.max);
    }
}

/// Read commands from stdin on a background thread
///
/// The thread ends on EOF or `quit`; a thread still blocked on stdin when the
/// host exits is simply abandoned.
pub fn spawn(
    mut surface: SurfaceSender,
    descriptor: UnitDescriptor,
    stop: StopFlag,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("rtwrap-console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if stop.is_stopped() {
                    break;
                }
                match parse_command(&line, &descriptor) {
                    Ok(None) => {}
                    Ok(Some(Command::Help)) => print_help(&descriptor),
                    Ok(Some(Command::Quit)) => {
                        stop.stop();
                        break;
                    }
                    Ok(Some(Command::Param { port, value })) => {
                        if !surface.send_param(port as u32, value) {
                            log::warn!("Control surface queue full, dropped {} = {}", port, value);
                        }
                    }
                    Ok(Some(Command::Midi(bytes))) => {
                        if !surface.send_midi(&bytes) {
                            log::warn!("Control surface queue full, dropped MIDI {:02x?}", bytes);
                        }
                    }
                    Err(e) => eprintln!("{}", e),
                }
            }
            log::debug!("Console input closed");
        })
        .context("Failed to spawn console thread")
}
