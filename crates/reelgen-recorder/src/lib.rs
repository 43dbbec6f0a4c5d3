//! Headless-browser scene capture.
//!
//! Drives a remote browser session over its debug protocol to load a URL,
//! settle lazy-loading widgets, record the viewport to a raw capture file,
//! and detect where meaningful content starts.

pub mod cdp;
pub mod error;
pub mod recorder;
pub mod session;
pub mod trim;

pub use error::{RecorderError, RecorderResult};
pub use recorder::{Capture, RecordRequest, SceneRecorder};
pub use session::{BrowserSession, SessionClient, SessionConfig};
