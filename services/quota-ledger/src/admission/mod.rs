pub mod error;
pub mod service;

pub use error::AdmissionError;
pub use service::ObjectAdmission;
