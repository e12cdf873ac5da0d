/**
 * Shared services the caches are built on:
 *  identity associations, the virtual tree,
 *  the content blob cache, the write overlay
 *  and the operation batcher.
 */
pub mod engine;
/**
 * The filesystem-operations interface every
 *  pipeline stage implements, plus the node
 *  type and path helpers.
 */
pub mod fao;
/**
 * Pipeline stages: the remote-backed base and
 *  the caching decorators stacked on top of it.
 */
pub mod faoimpls;
pub mod pipeline;
/**
 * The remote storage service as the engine
 *  sees it, and an in-memory implementation.
 */
pub mod remote;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::build_info;
    pub use crate::engine::{Engine, EngineConfig, Operation, ROOT_ID, ROOT_INO};
    pub use crate::fao::{ByteStream, FaoError, FsOps, NodeInfo};
    pub use crate::pipeline::{Layer, Pipeline};
    pub use crate::remote::{MemRemote, RemoteStorage};
    pub use crate::version::BuildInfo;
}
