//! Local HTTP bridge that turns Piper text-to-speech into WAV audio.

pub mod backends;
pub mod config_loader;
pub mod logging;
pub mod server;
pub mod wav;
