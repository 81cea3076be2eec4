//! Field-canvassing coordination: geographic walking-route
//! optimization, lease-based house claims over SQLite, and a realtime
//! roster/event channel for canvassers in the field.

pub mod availability;
pub mod channel;
mod error;
mod geo;
pub mod http;
pub mod logging;
pub mod model;
pub mod options;
pub mod route;
pub mod service;
pub mod solver;
pub mod store;
pub mod ws;

pub use channel::{WalkChannel, WalkEvent};
pub use error::{Error, Result};
pub use geo::{GeoPoint, EARTH_RADIUS_M};
pub use http::build_router;
pub use options::ServerOptions;
pub use route::OptimizedRoute;
pub use service::WalkService;
pub use solver::TourStrategy;
pub use store::Database;
