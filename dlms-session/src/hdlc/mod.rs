//! HDLC session layer module

pub mod address;
pub mod fcs;
pub mod frame;
pub mod parameters;
pub mod segment;
pub mod sequence;
pub mod session;
pub mod state;

pub use address::{HdlcAddress, reserved};
pub use fcs::FcsCalc;
pub use frame::{FLAG, FrameReader, FrameType, HdlcFrame, LLC_REQUEST, LLC_RESPONSE};
pub use parameters::HdlcParameters;
pub use segment::{Reassembler, Segment, segments};
pub use sequence::HdlcSequenceNumber;
pub use session::{HdlcRole, HdlcSession};
pub use state::HdlcConnectionState;
