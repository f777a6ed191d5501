pub mod build_info;
pub mod logging;
pub mod version;
