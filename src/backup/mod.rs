pub mod backup_config;
pub mod classify;
pub mod logging;
pub mod policy;
pub mod result_error;
pub mod run;
pub mod status;
pub mod store;
pub mod tar;
pub mod target_size;
pub mod validate;
