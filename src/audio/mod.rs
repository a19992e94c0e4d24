pub mod backend;
pub mod encoder;
pub mod file;
pub mod mixer;
pub mod routing;

pub use backend::{
    AudioFrame, AudioOutput, AudioStreamSource, DeviceError, DeviceErrorKind, MediaDevices,
    MediaStream, MediaTrack, PlaybackSink, StreamFormat,
};
pub use encoder::{
    negotiate_mime_type, Encoder, EncoderError, EncoderFactory, WavEncoder, WavEncoderFactory,
    WAV_MIME_TYPE,
};
pub use file::AudioFile;
pub use mixer::{AudioMixer, MixerConfig};
pub use routing::RoutingNode;
