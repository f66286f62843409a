//! Device plane: policy enforcement over MQTT.
//!
//! A single long-lived broker session carries control commands to the
//! fleet; topic routing depends on the device family, and every payload is
//! UTF-8 JSON published at QoS 1 without retain.

pub mod enforcer;
pub mod topics;

pub use enforcer::DeviceEnforcer;
pub use topics::control_topic;
