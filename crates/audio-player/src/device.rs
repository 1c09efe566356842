//! Output device discovery, validation and configuration.
//!
//! Device lists are never cached: outputs come and go (USB headsets, Bluetooth), so every
//! call re-enumerates through the backend. The CPAL helpers at the bottom of this module
//! are used by [`crate::output::CpalOutput`].

use std::sync::Arc;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::PlaybackError;
use crate::output::AudioOutput;

/// Output device metadata, valid only for the enumeration that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub max_output_channels: u16,
    pub sample_rate: u32,
}

/// Live view of the output devices exposed by an [`AudioOutput`] backend.
#[derive(Clone)]
pub struct DeviceRegistry {
    output: Arc<dyn AudioOutput>,
}

impl DeviceRegistry {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self { output }
    }

    /// Output-capable devices in backend enumeration order.
    pub fn list(&self) -> Result<Vec<DeviceDescriptor>, PlaybackError> {
        let devices = self.output.devices()?;
        Ok(devices
            .into_iter()
            .filter(|d| d.max_output_channels > 0)
            .collect())
    }

    /// Whether `id` is enumerable right now.
    ///
    /// An enumeration failure validates nothing.
    pub fn validate(&self, id: &str) -> bool {
        match self.list() {
            Ok(devices) => devices.iter().any(|d| d.id == id),
            Err(e) => {
                tracing::warn!(device = %id, "device enumeration failed during validation: {e}");
                false
            }
        }
    }

    /// Map a user choice (id, `#index`/index, or name substring) to a device.
    pub fn resolve(&self, choice: &str) -> Result<Option<DeviceDescriptor>, PlaybackError> {
        let devices = self.list()?;
        Ok(resolve_choice(&devices, choice).cloned())
    }
}

fn resolve_choice<'a>(devices: &'a [DeviceDescriptor], choice: &str) -> Option<&'a DeviceDescriptor> {
    let choice = choice.trim();
    if choice.is_empty() {
        return None;
    }
    if let Some(d) = devices.iter().find(|d| d.id == choice) {
        return Some(d);
    }
    if let Ok(index) = choice.trim_start_matches('#').parse::<usize>() {
        return devices.get(index);
    }
    devices.iter().find(|d| matches_device_name(&d.name, choice))
}

/// Enumerate CPAL output devices as descriptors.
///
/// Devices that report no output channels are skipped.
pub fn list_output_devices(host: &cpal::Host) -> Result<Vec<DeviceDescriptor>> {
    let devices = host
        .output_devices()
        .map_err(|e| anyhow!("enumerate output devices: {e}"))?;
    Ok(devices.filter_map(|d| describe_device(&d)).collect())
}

/// Re-enumerate and return the device currently carrying descriptor id `id`.
pub fn find_output_device(host: &cpal::Host, id: &str) -> Result<Option<cpal::Device>> {
    let mut devices = host
        .output_devices()
        .map_err(|e| anyhow!("enumerate output devices: {e}"))?;
    Ok(devices.find(|d| describe_device(d).is_some_and(|desc| desc.id == id)))
}

/// Describe the host default output device, if any.
pub fn default_output_device(host: &cpal::Host) -> Option<(cpal::Device, DeviceDescriptor)> {
    let device = host.default_output_device()?;
    let desc = describe_device(&device)?;
    Some((device, desc))
}

fn describe_device(device: &cpal::Device) -> Option<DeviceDescriptor> {
    let name = device
        .description()
        .map(|d| d.to_string())
        .inspect_err(|e| tracing::debug!("skipping device without description: {e}"))
        .ok()?;

    let (channels, top_rate) = device
        .supported_output_configs()
        .map(|ranges| {
            ranges.fold((0u16, 0u32), |(ch, rate), r| {
                (ch.max(r.channels()), rate.max(r.max_sample_rate()))
            })
        })
        .unwrap_or_default();
    let default = device.default_output_config().ok();
    let max_output_channels = match channels {
        0 => default.as_ref().map_or(0, |c| c.channels()),
        n => n,
    };
    if max_output_channels == 0 {
        return None;
    }

    Some(DeviceDescriptor {
        id: device_id_for(device, &name),
        sample_rate: default.map_or(top_rate, |c| c.sample_rate()),
        name,
        max_output_channels,
    })
}

/// Supported stream config closest to `rate` Hz and `channels` channels.
///
/// Ranges are ranked by distance to `rate`, then channel fit (exact, more, fewer), then
/// sample format with float first. Rate and channel mismatches are absorbed by the
/// resampler and the callback's channel mapping.
pub fn choose_stream_config(
    device: &cpal::Device,
    rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    device
        .supported_output_configs()?
        .map(|range| {
            let picked = rate.clamp(range.min_sample_rate(), range.max_sample_rate());
            let rank = config_rank(rate, channels, picked, range.channels(), range.sample_format());
            (rank, range.with_sample_rate(picked))
        })
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, config)| config)
        .ok_or_else(|| anyhow!("device reports no output configurations"))
}

fn config_rank(
    want_rate: u32,
    want_channels: u16,
    rate: u32,
    channels: u16,
    format: cpal::SampleFormat,
) -> (u32, u8, u8) {
    let channel_fit = match channels.cmp(&want_channels) {
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
        std::cmp::Ordering::Less => 2,
    };
    let format_rank = match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => u8::MAX,
    };
    (rate.abs_diff(want_rate), channel_fit, format_rank)
}

/// Backend id when the host provides one, otherwise the display name.
fn device_id_for(device: &cpal::Device, name: &str) -> String {
    match device.id() {
        Ok(id) => id.to_string(),
        Err(_) => name.to_string(),
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
