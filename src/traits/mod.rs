//! Hardware-agnostic traits at the I/O seam.

pub mod transport;

pub use transport::{InstrumentTransport, TransportFactory};
