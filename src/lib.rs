pub use layers;
pub use parametrize::{
    asymmetry, cached, frame, is_caching, with_cache, CacheScope, ConfigurationError, Parameter,
    Parametrizable, Parametrization, ParametrizeError, ParametrizedTensor, ShapeSpec, Sym, SymF,
    Symmetric, Transform, TransformSpec, TriangularSide,
};
pub use training;

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use layers::{Linear, LinearConfig, LinearInit};

/// Builds a square `Linear(n, n)` and registers `map` on its weight.
pub fn parametrized_linear<P>(n: usize, bias: bool, map: P, device: &Device) -> Result<Linear>
where
    P: Parametrization + 'static,
{
    let mut config = LinearConfig::new(n, n);
    config.bias = bias;
    let mut layer = Linear::with_init(config, &LinearInit::default(), device, DType::F32)
        .with_context(|| format!("failed to initialise Linear({n}, {n})"))?;
    let description = map.to_string();
    layer
        .register_parametrization("weight", map)
        .with_context(|| format!("failed to register {description} on Linear({n}, {n}).weight"))?;
    Ok(layer)
}
