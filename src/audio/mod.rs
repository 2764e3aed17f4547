pub mod concat;
pub mod synth;
pub mod tts;
pub mod worker;

pub use concat::{check_ffmpeg, concatenate_mp3, MIN_AUDIO_FILE_SIZE};
pub use synth::AudioSynth;
pub use tts::{OpenAiTts, PollinationsTts, TtsProvider, TtsRegistry, VoiceConfig, VoiceSettings};
pub use worker::{AudioWorker, WorkerScope};
