/// System module: workload measurement and host power-state integration

pub mod performance;
pub mod power;

pub use power::{PowerController, PowerSignal, SysfsPowerSource};
