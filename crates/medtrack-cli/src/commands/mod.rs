pub mod alarm;
pub mod backup;
pub mod config;
pub mod dose;
pub mod history;
pub mod med;
pub mod recover;
