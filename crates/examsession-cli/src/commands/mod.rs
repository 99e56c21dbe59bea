pub mod init;
pub mod result;
pub mod status;
pub mod take;
