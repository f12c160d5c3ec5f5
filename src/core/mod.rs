// Domain-layer modules and shared errors/models
pub mod pipeline {
    pub use crate::pipeline::*;
}

pub mod discovery {
    pub use crate::discovery::*;
}

pub mod dedup {
    pub use crate::dedup::*;
}

pub mod filter {
    pub use crate::filter::*;
}

pub mod enrichment {
    pub use crate::enrichment::*;
}

pub mod category {
    pub use crate::category::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
