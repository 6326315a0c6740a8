use crate::ai::AiError;
use language_utils::{TTS_CHANNELS, TTS_SAMPLE_RATE, TtsRequest};
use opfs::persistent;
use opfs::{DirectoryHandle as _, FileHandle as _, WritableFileStream as _};
use xxhash_rust::const_xxh3::xxh3_64 as const_xxh3;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("speech synthesis failed")]
    Synthesis(#[source] AiError),
    #[error("no audio was returned")]
    Empty,
    #[error("audio storage error: {0}")]
    Storage(String),
    #[error("audio playback failed: {0}")]
    Playback(String),
}

/// Decoded speech, one float sample per channel per frame in `[-1.0, 1.0)`.
#[derive(Clone, Debug, PartialEq)]
pub struct PcmAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl PcmAudio {
    /// Packed signed 16-bit little-endian samples. A dangling odd byte is dropped.
    pub fn from_pcm16le(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        if bytes.len() < 2 {
            return Err(AudioError::Empty);
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
            .collect();
        Ok(Self {
            sample_rate,
            channels: channels.max(1),
            samples,
        })
    }

    pub fn from_speech(bytes: &[u8]) -> Result<Self, AudioError> {
        Self::from_pcm16le(bytes, TTS_SAMPLE_RATE, TTS_CHANNELS)
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }

    /// Plays the clip once through the page's audio output.
    #[cfg(target_arch = "wasm32")]
    pub fn play(&self) -> Result<(), AudioError> {
        let playback = |e: wasm_bindgen::JsValue| AudioError::Playback(format!("{e:?}"));

        let context = web_sys::AudioContext::new().map_err(playback)?;
        let frames = self.frame_count() as u32;
        let buffer = context
            .create_buffer(u32::from(self.channels), frames, self.sample_rate as f32)
            .map_err(playback)?;
        for channel in 0..usize::from(self.channels) {
            let mut data: Vec<f32> = self
                .samples
                .iter()
                .skip(channel)
                .step_by(usize::from(self.channels))
                .copied()
                .collect();
            buffer
                .copy_to_channel(&mut data, channel as i32)
                .map_err(playback)?;
        }
        let source = context.create_buffer_source().map_err(playback)?;
        source.set_buffer(Some(&buffer));
        source
            .connect_with_audio_node(&context.destination())
            .map_err(playback)?;
        source.start().map_err(playback)?;
        Ok(())
    }
}

/// Synthesized speech kept in the origin private file system, so replaying a
/// word does not hit the AI server again.
#[derive(Clone)]
pub struct AudioCache {
    audio_dir: persistent::DirectoryHandle,
}

impl AudioCache {
    pub async fn new() -> Result<Self, AudioError> {
        let root = persistent::app_specific_dir()
            .await
            .map_err(|e| AudioError::Storage(format!("Failed to get app directory: {e:?}")))?;

        let audio_dir = root
            .get_directory_handle_with_options(
                "speech",
                &opfs::GetDirectoryHandleOptions { create: true },
            )
            .await
            .map_err(|e| AudioError::Storage(format!("Failed to get speech directory: {e:?}")))?;

        Ok(Self { audio_dir })
    }

    pub fn cache_filename(request: &TtsRequest) -> String {
        let cache_text = format!(
            "{language}:{text}",
            language = request.language,
            text = request.text
        );
        let cache_key = const_xxh3(cache_text.as_bytes());
        format!("{cache_key}.pcm")
    }

    pub async fn get_cached(&self, request: &TtsRequest) -> Option<Vec<u8>> {
        let cache_filename = Self::cache_filename(request);

        let file_handle = self
            .audio_dir
            .get_file_handle_with_options(
                &cache_filename,
                &opfs::GetFileHandleOptions { create: false },
            )
            .await
            .ok()?;

        match file_handle.read().await {
            Ok(bytes) if is_valid_pcm16(&bytes) => return Some(bytes),
            Ok(_) => log::warn!("Invalid speech cache detected for {cache_filename}, refetching"),
            Err(e) => log::warn!("Unreadable speech cache {cache_filename}: {e:?}"),
        }

        let mut audio_dir = self.audio_dir.clone();
        if let Err(e) = audio_dir.remove_entry(&cache_filename).await {
            log::warn!("Failed to remove speech cache {cache_filename}: {e:?}");
        }
        None
    }

    pub async fn cache_audio(&self, request: &TtsRequest, bytes: Vec<u8>) {
        let cache_filename = Self::cache_filename(request);

        if let Ok(mut file_handle) = self
            .audio_dir
            .get_file_handle_with_options(
                &cache_filename,
                &opfs::GetFileHandleOptions { create: true },
            )
            .await
            && let Ok(mut writable) = file_handle
                .create_writable_with_options(&opfs::CreateWritableOptions {
                    keep_existing_data: false,
                })
                .await
        {
            if let Err(e) = writable.write_at_cursor_pos(bytes).await {
                log::warn!("Failed to write speech cache {cache_filename}: {e:?}");
            }
            let _ = writable.close().await;
        }
    }
}

fn is_valid_pcm16(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes.len() % 2 == 0
}
