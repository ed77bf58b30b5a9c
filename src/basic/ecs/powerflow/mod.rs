pub mod init;
pub mod result_extract;
pub mod systems;
