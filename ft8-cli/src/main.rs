mod config;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use ft8_core::codec::ToneKeyedCodec;
use ft8_core::config::{DecodePoolConfig, ModeDescriptor};
use ft8_core::decode_pool::{DecodePool, DecodeTask};
use ft8_core::device::{list_input_devices, list_output_devices, CpalAudioSink, CpalAudioSource, NullRadio};
use ft8_core::external_audio::load_audio_file;
use ft8_core::interfaces::{AudioSink, AudioSource, Decoder, Encoder, RadioActuator};
use ft8_core::Engine;

use config::CliConfig;
use logging::{LogEvent, StructuredLogger};

#[derive(Parser, Debug)]
#[command(author, version, about = "FT8/FT4 slot-engine command line interface", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the engine against a configuration file and stream its events to the log.
    Run {
        /// Path to the engine's TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Offline-decode a WAV/FLAC/MP3/AAC clip through the decode pool in batch mode.
    DecodeWav {
        /// Audio clip to decode.
        input: PathBuf,
        /// Optional configuration file; only `mode` and `decodePool` are consulted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List the audio input and output devices the default host reports.
    Devices,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config),
        Command::DecodeWav { input, config } => decode_wav(input, config),
        Command::Devices => devices(),
    }
}

fn run(config_path: PathBuf) -> Result<()> {
    let cli_config = CliConfig::from_file(&config_path)
        .wrap_err_with(|| format!("failed to load config from {}", config_path.display()))?;

    let mut logger = StructuredLogger::new(cli_config.logging.clone())?;
    logger.log(LogEvent::Info {
        message: format!(
            "starting engine in {} mode with {} operator(s)",
            cli_config.engine.mode.name,
            cli_config.engine.operators.len()
        ),
    })?;

    let runtime = tokio::runtime::Runtime::new().wrap_err("failed to start async runtime")?;
    runtime.block_on(run_engine(cli_config, logger))
}

async fn run_engine(cli_config: CliConfig, mut logger: StructuredLogger) -> Result<()> {
    let codec = Arc::new(ToneKeyedCodec::new());
    let decoder = Arc::clone(&codec) as Arc<dyn Decoder>;
    let encoder = Arc::clone(&codec) as Arc<dyn Encoder>;

    let audio_source: Box<dyn AudioSource> = Box::new(
        CpalAudioSource::new(cli_config.engine.audio_capture.device_id.as_deref())
            .map_err(|e| eyre!("failed to open capture device: {e}"))?,
    );
    let audio_sink: Box<dyn AudioSink> = Box::new(
        CpalAudioSink::new(cli_config.engine.audio_play.device_id.as_deref())
            .map_err(|e| eyre!("failed to open playback device: {e}"))?,
    );
    let radio_actuator: Box<dyn RadioActuator> = Box::new(NullRadio::new());

    let mut handle = Engine::spawn(cli_config.engine, decoder, encoder, audio_source, audio_sink, radio_actuator)
        .await
        .map_err(|e| eyre!("failed to start engine: {e}"))?;

    logger.log(LogEvent::Info {
        message: "engine running, press Ctrl-C to stop".to_string(),
    })?;

    loop {
        tokio::select! {
            event = handle.recv_event() => {
                match event {
                    Some(event) => logger.log(LogEvent::Engine(event))?,
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                logger.log(LogEvent::Info { message: "shutdown requested".to_string() })?;
                break;
            }
        }
    }

    handle.shutdown().await.map_err(|e| eyre!("engine shutdown failed: {e}"))?;
    logger.log(LogEvent::Info {
        message: format!("engine stopped after {:.1}s", logger.elapsed()),
    })?;
    Ok(())
}

fn decode_wav(input: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let cli_config = match config_path {
        Some(path) => CliConfig::from_file(&path)
            .wrap_err_with(|| format!("failed to load config from {}", path.display()))?,
        None => CliConfig::default(),
    };
    let mode = cli_config.engine.mode;
    let pool_config = cli_config.engine.decode_pool;

    let mut logger = StructuredLogger::new(cli_config.logging)?;
    logger.log(LogEvent::Info {
        message: format!("decoding {} in {} mode", input.display(), mode.name),
    })?;

    let target_rate = mode.target_sample_rate_hz();
    let pcm = load_audio_file(&input, target_rate)
        .map_err(|e| eyre!("failed to load {}: {e}", input.display()))?;

    let window_samples = (mode.slot_ms as u64 * target_rate as u64 / 1000) as usize;
    if window_samples == 0 {
        return Err(eyre!("mode {} has a zero-length decode window", mode.name));
    }
    let chunks: Vec<&[f32]> = pcm.chunks(window_samples).collect();

    let runtime = tokio::runtime::Runtime::new().wrap_err("failed to start async runtime")?;
    runtime.block_on(async move {
        let codec: Arc<dyn Decoder> = Arc::new(ToneKeyedCodec::new());
        let pool = DecodePool::new(&pool_config, codec).map_err(|e| eyre!("failed to start decode pool: {e}"))?;

        let progress = ProgressBar::new(chunks.len() as u64);
        progress.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} windows ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut total_decodes = 0usize;
        for (window_idx, chunk) in chunks.into_iter().enumerate() {
            let task = DecodeTask {
                slot_id: format!("batch-{window_idx}"),
                window_idx,
                capture_start_ms: window_idx as i64 * mode.slot_ms,
                device_pcm: chunk.to_vec(),
                device_sample_rate: target_rate,
            };
            match pool.submit(task, &mode).await {
                Ok(result) => {
                    for frame in result.frames {
                        total_decodes += 1;
                        logger.log(LogEvent::Info {
                            message: format!(
                                "window {window_idx}: \"{}\" (snr={}dB freq={}Hz)",
                                frame.message, frame.snr_db, frame.freq_hz
                            ),
                        })?;
                    }
                }
                Err(e) => {
                    logger.log(LogEvent::Warn {
                        message: format!("window {window_idx} failed: {e}"),
                    })?;
                }
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        logger.log(LogEvent::Info {
            message: format!("decoded {total_decodes} frame(s) total"),
        })?;
        Ok::<(), color_eyre::eyre::Error>(())
    })
}

fn devices() -> Result<()> {
    println!("input devices:");
    for name in list_input_devices() {
        println!("  {name}");
    }
    println!("output devices:");
    for name in list_output_devices() {
        println!("  {name}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_sample_count_matches_ft8_slot() {
        let mode = ModeDescriptor::ft8();
        let samples = (mode.slot_ms as u64 * mode.target_sample_rate_hz() as u64 / 1000) as usize;
        assert_eq!(samples, 180_000);
    }

    #[test]
    fn decode_pool_config_defaults_are_usable() {
        let config = DecodePoolConfig::default();
        assert!(config.size >= 1);
    }
}
