pub mod app;
pub mod config;

pub use app::run;
