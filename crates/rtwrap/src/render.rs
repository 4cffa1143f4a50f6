//! Offline (freewheel) rendering to a WAV file
//!
//! Drives the same cycle as the live backends from a [`BufferCycle`] with the
//! freewheel flag set, so worker requests run synchronously. The unit's
//! reported latency is trimmed from the start of the output.

use std::path::Path;

use anyhow::{bail, Context, Result};

use rtwrap_core::audio::{BufferCycle, CycleIo};
use rtwrap_core::engine::{Host, TransportState};
use rtwrap_core::Sample;

/// Decoded input file, one vector per channel
pub struct InputAudio {
    pub sample_rate: u32,
    pub channels: Vec<Vec<Sample>>,
}

impl InputAudio {
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Sample for unit input `input` (channels wrap around), silence past the end
    fn sample(&self, input: usize, frame: usize) -> Sample {
        if self.channels.is_empty() {
            return 0.0;
        }
        self.channels[input % self.channels.len()]
            .get(frame)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Read a WAV file (integer or float)
pub fn read_input(path: &Path) -> Result<InputAudio> {
    let reader = hound::WavReader::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let spec = reader.spec();
    let n_channels = spec.channels.max(1) as usize;

    let samples: Vec<Sample> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to decode {:?}", path))?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()
                .with_context(|| format!("Failed to decode {:?}", path))?
        }
    };

    let mut channels = vec![Vec::with_capacity(samples.len() / n_channels); n_channels];
    for frame in samples.chunks_exact(n_channels) {
        for (channel, &s) in channels.iter_mut().zip(frame) {
            channel.push(s);
        }
    }

    log::info!(
        "Loaded {:?}: {} channels, {}Hz, {} frames",
        path,
        n_channels,
        spec.sample_rate,
        channels[0].len()
    );
    Ok(InputAudio {
        sample_rate: spec.sample_rate,
        channels,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub frames: usize,
    pub cycles: u64,
    /// Frames trimmed for the unit's latency
    pub latency: usize,
}

/// Render `frames` frames of output through `host` into `output`
pub fn render(
    host: &mut Host,
    sample_rate: u32,
    period: usize,
    input: Option<&InputAudio>,
    frames: usize,
    output: &Path,
) -> Result<RenderStats> {
    let n_in = host.driver.audio_in_count();
    let n_out = host.driver.audio_out_count();
    if n_out == 0 {
        bail!("Unit '{}' has no audio outputs to render", host.driver.descriptor().name);
    }
    let period = period.clamp(1, host.driver.max_period());

    let spec = hound::WavSpec {
        channels: n_out as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(output, spec).with_context(|| format!("Failed to create {:?}", output))?;

    let mut io = BufferCycle::new(n_in, n_out, period);
    io.set_freewheel(true);
    io.set_transport(TransportState::rolling_at(0));

    let mut consumed = 0;
    let mut written = 0;
    let mut skip: Option<usize> = None;
    let start_cycles = host.driver.cycles();

    while written < frames {
        for ch in 0..n_in {
            let buf = io.input_mut(ch);
            match input {
                Some(audio) => {
                    for (i, s) in buf.iter_mut().enumerate() {
                        *s = audio.sample(ch, consumed + i);
                    }
                }
                None => buf.fill(0.0),
            }
        }

        host.driver.process(&mut io);
        io.advance_transport();
        consumed += period;

        host.ui.drain_controls(|_| {});
        host.ui.drain_events(|_| {});
        host.latency.sync_unit_latency();

        // Latency is known once the unit has run a cycle
        let remaining_skip = skip.get_or_insert(host.latency.unit_latency() as usize);
        let start = (*remaining_skip).min(period);
        *remaining_skip -= start;
        let count = (period - start).min(frames - written);

        for i in start..start + count {
            for ch in 0..n_out {
                writer
                    .write_sample(io.output(ch)[i])
                    .context("Failed to write sample")?;
            }
        }
        written += count;
    }

    writer.finalize().context("Failed to finalize WAV file")?;

    let stats = RenderStats {
        frames: written,
        cycles: host.driver.cycles() - start_cycles,
        latency: host.latency.unit_latency() as usize,
    };
    log::info!(
        "Rendered {} frames in {} cycles to {:?} (latency {} frames trimmed)",
        stats.frames,
        stats.cycles,
        output,
        stats.latency
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtwrap_core::engine::HostBuilder;
    use rtwrap_core::units::{monitor, shaper};
    use rtwrap_core::urid::{UriMap, Urids};

    fn write_input(path: &Path, channels: u16, frames: usize, value: impl Fn(usize) -> f32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                writer.write_sample(value(i)).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn read_output(path: &Path) -> (hound::WavSpec, Vec<f32>) {
        let reader = hound::WavReader::open(path).unwrap();
        let spec = reader.spec();
        let samples = reader.into_samples::<f32>().map(|s| s.unwrap()).collect();
        (spec, samples)
    }

    #[test]
    fn test_passthrough_render() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = dir.path().join("in.wav");
        let out_path = dir.path().join("out.wav");
        write_input(&in_path, 1, 1000, |i| i as f32 / 1000.0);

        let input = read_input(&in_path).unwrap();
        assert_eq!(input.frames(), 1000);

        let urids = Urids::new(&mut UriMap::new());
        let mut host = HostBuilder::new(Box::new(monitor::Monitor::new(&urids)), urids)
            .build(input.sample_rate)
            .unwrap();
        let stats = render(&mut host, input.sample_rate, 256, Some(&input), input.frames(), &out_path).unwrap();
        assert_eq!(stats.frames, 1000);
        assert_eq!(stats.cycles, 4);
        assert_eq!(stats.latency, 0);

        let (spec, samples) = read_output(&out_path);
        assert_eq!(spec.channels, 2);
        assert_eq!(samples.len(), 2000);
        // Mono input feeds both unit inputs
        assert_eq!(samples[2 * 500], 0.5);
        assert_eq!(samples[2 * 500 + 1], 0.5);
    }

    #[test]
    fn test_render_trims_unit_latency() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = dir.path().join("in.wav");
        let out_path = dir.path().join("out.wav");
        write_input(&in_path, 2, 4800, |_| 0.5);
        let input = read_input(&in_path).unwrap();

        let urids = Urids::new(&mut UriMap::new());
        let mut host = HostBuilder::new(Box::new(shaper::Shaper::new(&urids)), urids)
            .with_control(shaper::LOOKAHEAD, 1.0)
            .build(48000)
            .unwrap();
        let stats = render(&mut host, 48000, 128, Some(&input), 4800, &out_path).unwrap();
        assert_eq!(stats.latency, 48);

        let (_, samples) = read_output(&out_path);
        assert_eq!(samples.len(), 2 * 4800);
        let expected = 0.5f32.tanh() / 1.0f32.tanh();
        assert!((samples[0] - expected).abs() < 1e-3, "first frame is not the lookahead gap");
    }

    #[test]
    fn test_render_without_outputs_fails() {
        let dir = tempfile::tempdir().unwrap();
        let urids = Urids::new(&mut UriMap::new());
        let unit = rtwrap_core::plugin::UnitDescriptor::new("urn:x", "x");
        assert_eq!(unit.count(rtwrap_core::plugin::PortKind::AudioOut), 0);

        struct Silent(rtwrap_core::plugin::UnitDescriptor);
        impl rtwrap_core::plugin::ProcessingUnit for Silent {
            fn descriptor(&self) -> &rtwrap_core::plugin::UnitDescriptor {
                &self.0
            }
            fn activate(&mut self, _: u32) -> rtwrap_core::plugin::HostResult<()> {
                Ok(())
            }
            fn run(&mut self, _: &mut rtwrap_core::plugin::PortBuffers<'_>) {}
        }

        let mut host = HostBuilder::new(Box::new(Silent(unit)), urids).build(48000).unwrap();
        assert!(render(&mut host, 48000, 64, None, 64, &dir.path().join("x.wav")).is_err());
    }
}
