pub mod certificate_generator;
pub mod job_broker;
pub mod status_store;
pub mod time_service;

pub use certificate_generator::CertificateGenerator;
pub use job_broker::{FailureDisposition, JobBroker};
pub use status_store::StatusStore;
pub use time_service::TimeService;
