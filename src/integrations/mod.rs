//! External service integrations.

pub mod transport {
    pub use crate::transport::*;
}

pub mod providers {
    pub use crate::providers::*;
}

pub mod services {
    pub use crate::services::*;
}
