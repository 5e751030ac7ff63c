use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Device;

use crate::audio::downmix;

fn get_host() -> cpal::Host {
    cpal::default_host()
}

pub fn get_or_default_input(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    let target = match device_name {
        Some(name) => name,
        None => {
            let device = host
                .default_input_device()
                .ok_or_else(|| anyhow::anyhow!("No default input device"))?;
            return Ok(device);
        }
    };

    for in_device in host.input_devices()? {
        if in_device.name().is_ok_and(|name| name == target) {
            return Ok(in_device);
        }
    }
    Err(anyhow::anyhow!("No input device named {:?}", target))
}

pub fn get_or_default_output(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    let target = match device_name {
        Some(name) => name,
        None => {
            let device = host
                .default_output_device()
                .ok_or_else(|| anyhow::anyhow!("No default output device"))?;
            return Ok(device);
        }
    };

    for out_device in host.output_devices()? {
        if out_device.name().is_ok_and(|name| name == target) {
            return Ok(out_device);
        }
    }
    Err(anyhow::anyhow!("No output device named {:?}", target))
}

pub fn get_available_inputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_device = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let mut device_names: Vec<String> = Vec::new();
    for in_device in host.input_devices()? {
        let d_name = in_device.name()?;
        let d_cfg = in_device.default_input_config()?;
        let mut d = format!(
            " * {}({}ch, {}hz)",
            d_name,
            d_cfg.channels(),
            d_cfg.sample_rate().0
        );
        if d_name == default_device {
            d.push_str(" [default]");
        }
        device_names.push(d);
    }
    Ok(device_names.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_device = host
        .default_output_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let mut device_names: Vec<String> = Vec::new();
    for out_device in host.output_devices()? {
        let d_name = out_device.name()?;
        let d_cfg = out_device.default_output_config()?;
        let mut d = format!(
            " * {}({}ch, {}hz)",
            d_name,
            d_cfg.channels(),
            d_cfg.sample_rate().0
        );
        if d_name == default_device {
            d.push_str(" [default]");
        }
        device_names.push(d);
    }
    Ok(device_names.join("\n"))
}

/// A running microphone capture. Dropping (or calling [`stop`]) tears the
/// underlying stream down; the capture thread exits shortly after.
///
/// [`stop`]: CaptureHandle::stop
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// While muted the stream keeps running but no frames are delivered,
    /// so unmuting is instant.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start capturing mono f32 frames from an input device onto `frames`.
///
/// cpal streams are not `Send`, so the stream lives on a dedicated thread;
/// the build result is reported back synchronously before this returns.
/// Frames are delivered with `try_send`; a slow consumer drops frames
/// rather than stalling the audio callback.
pub fn capture_input(
    device_name: Option<String>,
    frames: tokio::sync::mpsc::Sender<Vec<f32>>,
) -> anyhow::Result<CaptureHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = stop.clone();
    let muted = Arc::new(AtomicBool::new(false));
    let muted_cb = muted.clone();
    let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<()>>();

    let join = std::thread::spawn(move || {
        let built = (|| -> anyhow::Result<cpal::Stream> {
            let device = get_or_default_input(device_name)?;
            let config = device.default_input_config()?;
            let channels = config.channels() as usize;
            tracing::debug!(
                "Capturing from {:?} ({}ch, {}hz)",
                device.name().unwrap_or_default(),
                channels,
                config.sample_rate().0
            );
            let stream = device.build_input_stream(
                &config.into(),
                move |data: &[f32], _| forward_frame(&muted_cb, &frames, data, channels),
                |e| tracing::error!("capture stream error: {}", e),
                None,
            )?;
            stream.play()?;
            Ok(stream)
        })();

        match built {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                while !stop_thread.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        }
    });

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(CaptureHandle {
            stop,
            muted,
            join: Some(join),
        }),
        Ok(Err(e)) => {
            let _ = join.join();
            Err(e)
        }
        Err(_) => {
            let _ = join.join();
            Err(anyhow::anyhow!("capture thread exited before reporting"))
        }
    }
}

fn forward_frame(
    muted: &AtomicBool,
    frames: &tokio::sync::mpsc::Sender<Vec<f32>>,
    data: &[f32],
    channels: usize,
) {
    if muted.load(Ordering::Relaxed) {
        return;
    }
    if frames.try_send(downmix(data, channels)).is_err() {
        tracing::trace!("capture frame dropped, consumer busy");
    }
}
