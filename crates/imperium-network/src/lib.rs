//! Network plane: device registry and the Linux traffic-control enforcer.
//!
//! Per managed interface the enforcer maintains an HTB tree:
//!
//! ```text
//!   root 1: htb  default 99
//!    └─ 1:1  link ceiling
//!        ├─ 1:<classid>  one per device (optional netem child <classid>:)
//!        └─ 1:99         catch-all default
//!   u32 filters at parent 1:0  match ip dst <device-ip>/32 → flowid 1:<classid>
//! ```
//!
//! Every public operation is idempotent: replaying the same policy sequence
//! is a no-op and the kernel always reflects the latest per-device policy.

pub mod enforcer;
pub mod registry;
pub mod stats;

pub use enforcer::NetworkEnforcer;
pub use registry::{DeviceEntry, DeviceRegistry};
pub use stats::TcClassStats;
