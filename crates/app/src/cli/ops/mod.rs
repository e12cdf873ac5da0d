pub mod init;
pub mod login;
#[cfg(feature = "fuse")]
pub mod mount;
pub mod version;

pub use init::Init;
pub use login::Login;
#[cfg(feature = "fuse")]
pub use mount::Mount;
pub use version::Version;
