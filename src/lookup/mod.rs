//! Government data lookups: keys, payloads, upstreams and the client facade.

mod client;
mod http;
mod key;
mod simulated;
mod types;

pub use client::LookupClient;
pub use key::{Domain, LookupKey};
#[cfg(test)]
pub use types::{LicensePoints, VehicleInfo};
