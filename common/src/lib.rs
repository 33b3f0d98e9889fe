mod analyst;
mod anomaly;
mod db;
mod helpers;
mod schema;
mod scoring;

pub use analyst::*;
pub use anomaly::*;
pub use db::*;
pub use helpers::*;
pub use schema::*;
pub use scoring::*;
