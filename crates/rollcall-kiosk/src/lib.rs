//! rollcall-kiosk: Capture-side session for registration and check-in.
//!
//! The camera and the face model are injected through [`FrameSource`] and
//! [`FaceEncoder`], so enrollment capture and the check-in polling loop run
//! against any implementation, including scripted ones in tests.

pub mod session;
pub mod source;

pub use session::{CheckinCandidate, CheckinLoop, KioskSession, SessionConfig};
pub use source::{FaceEncoder, Frame, FrameSource, KioskError};
