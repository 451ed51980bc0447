mod build;
mod image;
mod shell;
mod status;

pub use build::cmd_build;
pub use image::cmd_image;
pub use shell::cmd_shell;
pub use status::cmd_status;
