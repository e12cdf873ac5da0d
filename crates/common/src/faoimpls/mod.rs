//! Pipeline stages. Each one implements [`FsOps`](crate::fao::FsOps) by
//! wrapping a delegate that implements it too.

mod clean_path;
mod local_id;
mod log;
mod read_cache;
mod remote;
mod tree_cache;
mod write_cache;

pub use clean_path::CleanPathFao;
pub use local_id::LocalIdFao;
pub use log::LogFao;
pub use read_cache::ReadCacheFao;
pub use remote::{decode_result, RemoteFao};
pub use tree_cache::TreeCacheFao;
pub use write_cache::WriteCacheFao;
