pub mod alerts;

pub use alerts::{AlertSink, SecurityAlert, TracingAlertSink};
