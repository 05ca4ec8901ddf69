//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return `candle_core::Result<()>`
//! so call sites can propagate errors without panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(context: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected rank {rank}, got shape {:?}",
            tensor.dims()
        )))
    }
}

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected shape {:?}, got {:?}",
            expected, actual
        )))
    }
}

/// Validates the feature axis of a `(.., features)` input.
pub fn expect_last_dim(context: &str, tensor: &Tensor, features: usize) -> Result<()> {
    match tensor.dims().last() {
        Some(&actual) if actual == features => Ok(()),
        _ => Err(Error::Msg(format!(
            "{context}: expected trailing dimension {features}, got shape {:?}",
            tensor.dims()
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(context: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.iter().copied().any(|allowed| allowed == dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected dtype in {:?}, got {:?}",
            allowed, dtype
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn reports_context_in_messages() -> Result<()> {
        let t = Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?;
        expect_rank("probe", &t, 2)?;
        expect_shape("probe", &t, &[2, 3])?;
        expect_last_dim("probe", &t, 3)?;
        expect_dtype_in("probe", &t, &[DType::F32])?;

        let err = expect_shape("probe", &t, &[3, 2]).unwrap_err();
        assert!(err.to_string().contains("probe"));
        assert!(expect_rank("probe", &t, 1).is_err());
        assert!(expect_last_dim("probe", &t, 2).is_err());
        assert!(expect_dtype_in("probe", &t, &[DType::F16]).is_err());
        Ok(())
    }
}
