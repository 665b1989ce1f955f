use anyhow::Context;
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the named input device, or the host default when no name is given.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .context("No default input device"),
        Some(target) => host
            .input_devices()
            .context("Failed to enumerate input devices")?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .with_context(|| format!("No input device named {target:?}")),
    }
}

/// Finds the named output device, or the host default when no name is given.
pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        None => host
            .default_output_device()
            .context("No default output device"),
        Some(target) => host
            .output_devices()
            .context("Failed to enumerate output devices")?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .with_context(|| format!("No output device named {target:?}")),
    }
}

fn describe(name: &str, channels: u16, rate: u32, is_default: bool) -> String {
    let mut d = format!(" * {}({}ch, {}hz)", name, channels, rate);
    if is_default {
        d.push_str(" [default]");
    }
    d
}

/// One line per input device with its default channel count and rate.
pub fn get_available_inputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut device_names = Vec::new();
    for device in host.input_devices().context("No input devices found")? {
        let Ok(name) = device.name() else { continue };
        match device.default_input_config() {
            Ok(cfg) => device_names.push(describe(
                &name,
                cfg.channels(),
                cfg.sample_rate().0,
                default_name.as_deref() == Some(name.as_str()),
            )),
            Err(e) => tracing::debug!("Skipping input {name}: {e}"),
        }
    }
    Ok(device_names.join("\n"))
}

/// One line per output device with its default channel count and rate.
pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut device_names = Vec::new();
    for device in host.output_devices().context("No output devices found")? {
        let Ok(name) = device.name() else { continue };
        match device.default_output_config() {
            Ok(cfg) => device_names.push(describe(
                &name,
                cfg.channels(),
                cfg.sample_rate().0,
                default_name.as_deref() == Some(name.as_str()),
            )),
            Err(e) => tracing::debug!("Skipping output {name}: {e}"),
        }
    }
    Ok(device_names.join("\n"))
}
