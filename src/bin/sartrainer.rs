//! sartrainer - search-and-rescue camera training simulator
//!
//! Wires the core together and runs the control loop:
//! 1. Acquires the live feed on a background thread with auto-reconnect
//! 2. Polls the controller once per iteration
//! 3. Forwards fresh frames to the recording sink while active
//! 4. Reacts to mapped controller buttons (record toggle, snapshot)
//!
//! Overlay rendering and the display window are external collaborators;
//! this binary runs headless and leaves a hook where a renderer plugs in.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sartrainer::{
    save_snapshot, AppConfig, Calibration, ControllerState, Frame, FrameChannel, FrameSource,
    Joystick, Recorder,
};

/// Pure overlay hook: `(frame, controller state, recording?) -> frame`.
type OverlayFn = fn(&Frame, &ControllerState, bool) -> Frame;

#[derive(Parser, Debug)]
#[command(name = "sartrainer", about = "Search-and-rescue camera training simulator")]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Video source override (device index or URL)
    #[arg(short, long)]
    video: Option<String>,
    /// Controller device index override
    #[arg(short, long)]
    joystick: Option<u32>,
    /// List attached controllers and exit
    #[arg(short, long)]
    list_joysticks: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_joysticks {
        return list_joysticks();
    }

    let mut config = AppConfig::load(args.config.as_deref());
    if let Some(video) = args.video {
        config.video.source = video;
    }
    if let Some(index) = args.joystick {
        config.joystick.device_index = index;
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Relaxed);
        })?;
    }

    let channel = FrameChannel::new();
    let source = match FrameSource::spawn(config.video.source_config(), channel.clone()) {
        Ok(source) => Some(source),
        Err(err) => {
            log::warn!("video source unavailable: {:#}; continuing without a feed", err);
            None
        }
    };

    let mut joystick = match Joystick::open(
        config.joystick.calibration.clone(),
        config.joystick.device_index,
    ) {
        Ok(joystick) => joystick,
        Err(err) => {
            log::warn!("controller unavailable: {:#}; continuing without input", err);
            Joystick::disconnected(config.joystick.calibration.clone())
        }
    };

    let mut recorder = Recorder::new(config.recording.clone());
    let overlay: Option<OverlayFn> = None;
    let record_button = config.joystick.calibration.record_button;
    let snapshot_button = config.joystick.calibration.snapshot_button;

    log::info!("{} running, press Ctrl-C to quit", config.window.title);

    while running.load(Ordering::Relaxed) {
        for edge in joystick.poll() {
            if !edge.pressed {
                continue;
            }
            if edge.button == record_button {
                toggle_recording(&mut recorder, source.as_ref());
            } else if edge.button == snapshot_button {
                if let Some(frame) = channel.latest() {
                    if let Err(err) = save_snapshot(&frame, &config.recording.output_dir) {
                        log::error!("snapshot failed: {:#}", err);
                    }
                }
            }
        }

        if let Some(frame) = channel.latest_fresh() {
            if recorder.is_recording() {
                let composed = overlay.filter(|_| config.recording.include_overlay).map(
                    |render| render(&frame, joystick.state(), true),
                );
                recorder.write_frame(composed.as_ref().unwrap_or(&frame));
            }
            // A display surface would present the frame here.
        }

        // Keep the loop responsive without spinning.
        std::thread::sleep(Duration::from_millis(5));
    }

    log::info!("shutting down");
    recorder.stop();
    drop(source);
    Ok(())
}

fn toggle_recording(recorder: &mut Recorder, source: Option<&FrameSource>) {
    if recorder.is_recording() {
        recorder.stop();
        return;
    }
    let Some(source) = source else {
        log::warn!("cannot record without a video source");
        return;
    };
    // Record at the source's negotiated properties, not the requested ones.
    recorder.start(source.width(), source.height(), source.fps());
}

fn list_joysticks() -> Result<()> {
    let joystick = Joystick::open(Calibration::default(), 0)?;
    let names = joystick.device_names();
    println!("Found {} controller(s):", names.len());
    for (index, name) in names.iter().enumerate() {
        println!("  [{}] {}", index, name);
    }
    if names.is_empty() {
        println!("  (none)");
    }
    Ok(())
}
