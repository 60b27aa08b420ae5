pub mod binding;
pub mod dispatch;
pub mod engine;
pub mod run;
pub mod transport;
