pub mod capture_delegate;
pub mod capture_provider;
pub mod device_directory;
