pub mod hls;
pub mod peer;

pub use hls::SimulatedEngine;
pub use peer::SimulatedPeer;
