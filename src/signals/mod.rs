pub mod botness;
pub mod fingerprint;
pub mod ip_identity;
pub mod observation;
pub mod request_risk;
pub mod user_agent;
