//! Compressed-audio decode via symphonia.
//!
//! Remote endpoints answer with MPEG audio; the chunked download path and
//! artifact playback need raw PCM out of it.

use symphonia::core::audio::SampleBuffer as InterleavedBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::codec::SampleBuffer;
use crate::error::{EloquiError, Result};

/// Decode MPEG audio bytes into a mono sample buffer at the stream's rate.
pub fn decode_mpeg(bytes: &[u8]) -> Result<SampleBuffer> {
    let stream = MediaSourceStream::new(
        Box::new(std::io::Cursor::new(bytes.to_vec())),
        Default::default(),
    );
    let mut hint = Hint::new();
    hint.mime_type("audio/mpeg");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| EloquiError::Decode(format!("mpeg probe: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| EloquiError::Decode("mpeg: no decodable track".into()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EloquiError::Decode(format!("mpeg decoder: {e}")))?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let mut channel_count = 1usize;
    let mut interleaved: Option<InterleavedBuffer<f32>> = None;
    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(EloquiError::Decode(format!("mpeg packet: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if interleaved.is_none() {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channel_count = spec.channels.count().max(1);
                    interleaved = Some(InterleavedBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = &mut interleaved {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            // A malformed frame is skippable; the rest of the stream may be fine.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(EloquiError::Decode(format!("mpeg decode: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(EloquiError::Decode("mpeg: stream held no audio".into()));
    }

    // Interleaved → mono mix.
    let mono: Vec<f32> = if channel_count == 1 {
        samples
    } else {
        samples
            .chunks(channel_count)
            .map(|frame| frame.iter().sum::<f32>() / channel_count as f32)
            .collect()
    };

    Ok(SampleBuffer::mono(mono, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let err = decode_mpeg(&[0u8; 64]).unwrap_err();
        assert!(matches!(err, EloquiError::Decode(_)));
    }

    #[test]
    fn empty_input_is_a_decode_error() {
        assert!(decode_mpeg(&[]).is_err());
    }
}
