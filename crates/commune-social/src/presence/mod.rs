//! Visitor presence: a periodic upsert of this session's row plus a sweep
//! of stale rows approximates who is online.

mod geo;
mod session;
mod types;

pub use geo::{GeoLocation, GeoLocator, HttpGeoLocator, NoGeoLocator};
pub use session::VisitorPresence;
pub use types::PresenceSettings;

#[cfg(test)]
mod tests;
