pub mod error;

pub use error::{RemotingError, Result, TransportError};
