pub mod sphere;

// Commonly used types, re-exported for callers
pub use sphere::{
    client::SphereClient,
    config::SphereConfig,
    context::SphereContext,
    error::{FieldError, SphereError, SphereResult},
    live::{InsertAt, LiveView, ViewListener},
};
