use std::io::{Cursor, Read};

use log::{debug, error};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::protocol::{DecodedTrack, Message, PlaybackMessage, TrackSource};

/// Largest payload accepted from a link, to keep a bad URL from exhausting
/// memory.
const MAX_LINK_BYTES: u64 = 256 * 1024 * 1024;

/// Turns track sources into interleaved f32 sample buffers for the player.
/// Results carry the generation of the request so the player can discard
/// decodes that were superseded by a newer play intent.
pub struct AudioDecoder {
    bus_receiver: Receiver<Message>,
    bus_sender: Sender<Message>,
}

impl AudioDecoder {
    pub fn new(bus_receiver: Receiver<Message>, bus_sender: Sender<Message>) -> Self {
        Self {
            bus_receiver,
            bus_sender,
        }
    }

    pub fn run(&mut self) {
        loop {
            while let Ok(message) = self.bus_receiver.blocking_recv() {
                if let Message::Playback(PlaybackMessage::LoadSource { generation, source }) =
                    message
                {
                    debug!("AudioDecoder: decoding generation {}", generation);
                    let result = match self.resolve_bytes(source) {
                        Ok((bytes, extension)) => decode_bytes(&bytes, &extension),
                        Err(reason) => Err(reason),
                    };
                    let message = match result {
                        Ok(track) => {
                            debug!(
                                "AudioDecoder: generation {} decoded, {} samples at {} Hz",
                                generation,
                                track.samples.len(),
                                track.sample_rate
                            );
                            PlaybackMessage::SourceDecoded { generation, track }
                        }
                        Err(reason) => {
                            error!("AudioDecoder: generation {} failed: {}", generation, reason);
                            PlaybackMessage::DecodeFailed { generation, reason }
                        }
                    };
                    let _ = self.bus_sender.send(Message::Playback(message));
                }
            }
            error!("AudioDecoder: receiver error, restarting loop");
        }
    }

    fn resolve_bytes(&self, source: TrackSource) -> Result<(Vec<u8>, String), String> {
        match source {
            TrackSource::Bytes {
                data, extension, ..
            } => Ok((data, extension)),
            TrackSource::Link(url) => {
                debug!("AudioDecoder: fetching link {}", url);
                let extension = url
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.to_lowercase())
                    .unwrap_or_default();
                let response = ureq::get(&url)
                    .call()
                    .map_err(|e| format!("failed to fetch {}: {}", url, e))?;
                let mut bytes = Vec::new();
                response
                    .into_reader()
                    .take(MAX_LINK_BYTES)
                    .read_to_end(&mut bytes)
                    .map_err(|e| format!("failed to read {}: {}", url, e))?;
                Ok((bytes, extension))
            }
        }
    }
}

/// Decodes a complete in-memory payload with the platform decoder stack.
fn decode_bytes(bytes: &[u8], extension: &str) -> Result<DecodedTrack, String> {
    let media_source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    if !extension.is_empty() {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            media_source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| format!("unsupported source: {}", e))?;

    let mut format_reader = probed.format;
    let track = format_reader
        .default_track()
        .ok_or_else(|| "no default track found".to_string())?;

    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let channels = track
        .codec_params
        .channels
        .map(|channels| channels.count())
        .unwrap_or(2) as u16;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| format!("failed to create decoder: {}", e))?;

    let mut decoded_samples = Vec::new();
    while let Ok(packet) = format_reader.next_packet() {
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = decoded.spec();
                let capacity = decoded.capacity() as u64;
                let mut sample_buffer = SampleBuffer::<f32>::new(capacity, *spec);
                sample_buffer.copy_interleaved_ref(decoded);
                decoded_samples.extend_from_slice(sample_buffer.samples());
            }
            Err(e) => {
                error!("AudioDecoder: decode error: {}", e);
                break;
            }
        }
    }

    if decoded_samples.is_empty() {
        return Err("source produced no audio".to_string());
    }

    let duration_ms = (sample_rate > 0 && channels > 0).then(|| {
        let frames = decoded_samples.len() as u64 / u64::from(channels);
        frames * 1_000 / u64::from(sample_rate)
    });

    Ok(DecodedTrack {
        samples: decoded_samples,
        sample_rate,
        channels,
        duration_ms,
    })
}
