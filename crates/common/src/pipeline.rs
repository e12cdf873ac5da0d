//! Assembling pipeline stages into one [`FsOps`].
//!
//! The stage order is an explicit list. The first layer wraps the base and
//! each following layer wraps the one before it, so the last layer is the
//! one callers talk to.

use std::fmt;
use std::sync::Arc;

use crate::engine::Engine;
use crate::fao::FsOps;
use crate::faoimpls::{
    CleanPathFao, LocalIdFao, LogFao, ReadCacheFao, RemoteFao, TreeCacheFao, WriteCacheFao,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    LocalIds,
    ReadCache,
    TreeCache,
    WriteCache,
    CleanPath,
    Log,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::LocalIds => "local-ids",
            Layer::ReadCache => "read-cache",
            Layer::TreeCache => "tree-cache",
            Layer::WriteCache => "write-cache",
            Layer::CleanPath => "clean-path",
            Layer::Log => "log",
        };
        f.write_str(name)
    }
}

pub struct Pipeline;

impl Pipeline {
    /// A builder over `base`, with no layers yet.
    pub fn builder(engine: &Engine, base: Arc<dyn FsOps>) -> PipelineBuilder<'_> {
        PipelineBuilder {
            engine,
            base,
            layers: Vec::new(),
        }
    }

    /// A builder over a [`RemoteFao`] for `engine`'s remote.
    pub fn remote(engine: &Engine) -> PipelineBuilder<'_> {
        Self::builder(engine, Arc::new(RemoteFao::new(engine)))
    }

    /// The default layer order, innermost first. The content caches are only
    /// included when `experimental_cache` is set.
    pub fn standard(experimental_cache: bool) -> Vec<Layer> {
        let mut layers = vec![Layer::LocalIds];
        if experimental_cache {
            layers.push(Layer::ReadCache);
        }
        layers.push(Layer::TreeCache);
        if experimental_cache {
            layers.push(Layer::WriteCache);
        }
        layers.push(Layer::CleanPath);
        layers.push(Layer::Log);
        layers
    }
}

pub struct PipelineBuilder<'a> {
    engine: &'a Engine,
    base: Arc<dyn FsOps>,
    layers: Vec<Layer>,
}

impl<'a> PipelineBuilder<'a> {
    pub fn with_layers(mut self, layers: Vec<Layer>) -> Self {
        self.layers = layers;
        self
    }

    pub fn layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    /// The layers that `build` will apply, innermost first.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn build(self) -> Arc<dyn FsOps> {
        let engine = self.engine;
        let description: Vec<String> = self.layers.iter().map(Layer::to_string).collect();
        tracing::debug!(layers = %description.join(" -> "), "building pipeline");

        self.layers
            .into_iter()
            .fold(self.base, |delegate, layer| -> Arc<dyn FsOps> {
                match layer {
                    Layer::LocalIds => {
                        Arc::new(LocalIdFao::new(delegate, engine.associations().clone()))
                    }
                    Layer::ReadCache => Arc::new(ReadCacheFao::new(delegate, engine)),
                    Layer::TreeCache => Arc::new(TreeCacheFao::new(delegate, engine)),
                    Layer::WriteCache => Arc::new(WriteCacheFao::new(delegate, engine)),
                    Layer::CleanPath => Arc::new(CleanPathFao::new(delegate)),
                    Layer::Log => Arc::new(LogFao::new(delegate)),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_order() {
        assert_eq!(
            Pipeline::standard(false),
            vec![Layer::LocalIds, Layer::TreeCache, Layer::CleanPath, Layer::Log]
        );
        assert_eq!(
            Pipeline::standard(true),
            vec![
                Layer::LocalIds,
                Layer::ReadCache,
                Layer::TreeCache,
                Layer::WriteCache,
                Layer::CleanPath,
                Layer::Log,
            ]
        );
    }
}
