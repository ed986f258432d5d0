pub mod application;
pub mod bootstrap;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod shared;
pub mod shutdown;

pub use config::Config;
pub use domain::entities::*;
pub use domain::errors::{PipelineError, PipelineResult};
pub use domain::ports::{CertificateGenerator, FailureDisposition, JobBroker, StatusStore};
pub use infrastructure::persistence::Database;
