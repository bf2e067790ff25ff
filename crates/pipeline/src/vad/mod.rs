//! Voice Activity Detection
//!
//! Energy-envelope frame classifier with end-of-turn hysteresis. Frames are
//! 30 ms at 16 kHz; 24 kHz input is resampled internally, with leftover
//! samples buffered so frame boundaries survive arbitrary chunking.

mod session;

pub use session::{detect_segments, SpeechSegment, VadConfig, VadSession, VadState, VadStats};
