//! Decode synthesized speech bytes into a [`SampleBuffer`].
//!
//! Uses Symphonia to probe the container (hinted by the requested response format) and
//! decode every packet into interleaved `f32`. Speech responses are short, so the whole
//! clip is decoded up front.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer as DecodedSamples;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::buffer::SampleBuffer;
use crate::error::PlaybackError;

/// Decode a complete in-memory audio file.
///
/// `format_hint` is a file extension such as `mp3` or `wav`; an empty hint lets the
/// probe sniff the container.
pub fn decode_audio(bytes: Vec<u8>, format_hint: &str) -> Result<SampleBuffer, PlaybackError> {
    if bytes.is_empty() {
        return Err(PlaybackError::DecodeFailed("empty audio payload".to_string()));
    }

    let mut hint = Hint::new();
    let ext = format_hint.trim().trim_start_matches('.');
    if !ext.is_empty() {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| PlaybackError::DecodeFailed(format!("probe: {e}")))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| PlaybackError::DecodeFailed("no default audio track".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| PlaybackError::DecodeFailed(format!("codec: {e}")))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut rate = codec_params.sample_rate;
    let mut channels = codec_params.channels.map(|c| c.count() as u16);

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(PlaybackError::DecodeFailed(format!("read packet: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(PlaybackError::DecodeFailed(format!("decode: {e}"))),
        };

        let spec = *decoded.spec();
        rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count() as u16);

        let mut buf = DecodedSamples::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    let rate = rate.ok_or_else(|| PlaybackError::DecodeFailed("unknown sample rate".to_string()))?;
    let channels =
        channels.ok_or_else(|| PlaybackError::DecodeFailed("unknown channel layout".to_string()))?;
    if samples.is_empty() {
        return Err(PlaybackError::DecodeFailed("no audio samples decoded".to_string()));
    }

    tracing::debug!(
        rate_hz = rate,
        channels,
        samples = samples.len(),
        "decoded speech audio"
    );
    Ok(SampleBuffer::new(samples, rate, channels))
}
