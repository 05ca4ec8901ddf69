use candle_core::{Device, Tensor};
use candle_nn::Module;
use geoparam::{
    asymmetry, cached, parametrized_linear,
    training::{Sgd, SgdConfig},
    ConfigurationError, Parametrizable, SymF, Symmetric, Transform,
};

fn assert_is_symmetric(x: &Tensor) -> candle_core::Result<()> {
    let value = asymmetry(x)?;
    assert!(value <= 1e-6, "max |X - X^T| = {value}");
    Ok(())
}

fn sgd(lr: f64) -> SgdConfig {
    SgdConfig {
        learning_rate: lr,
        momentum: 0.0,
        weight_decay: 0.0,
        clip_global_norm: None,
    }
}

#[test]
fn backprop_keeps_linear_weight_symmetric() -> anyhow::Result<()> {
    let device = Device::Cpu;
    for n in [1usize, 2, 3, 8] {
        for lower in [true, false] {
            let layer = parametrized_linear(n, true, Symmetric::new(&[n, n], lower)?, &device)?;
            let input = Tensor::rand(0f32, 1f32, (5, n), &device)?;
            let mut optim = Sgd::new(layer.named_parameters(), sgd(1.0))?;

            for _ in 0..2 {
                let loss = {
                    let _scope = cached();
                    assert_is_symmetric(&layer.weight()?)?;
                    layer.forward(&input)?.sum_all()?
                };
                let mut grads = loss.backward()?;
                optim.step(&mut grads)?;
                assert_is_symmetric(&layer.weight()?)?;
            }
        }
    }
    Ok(())
}

#[test]
fn rank_constrained_backprop_keeps_linear_weight_symmetric() -> anyhow::Result<()> {
    let device = Device::Cpu;
    for n in [1usize, 2, 3, 8] {
        for lower in [true, false] {
            let rank = n.div_ceil(2);
            let map = SymF::new(&[n, n], rank, Transform::softplus(), lower)?;
            let layer = parametrized_linear(n, false, map, &device)?;
            let input = Tensor::rand(0f32, 1f32, (5, n), &device)?;
            let mut optim = Sgd::new(layer.named_parameters(), sgd(0.1))?;

            for _ in 0..2 {
                let loss = {
                    let _scope = cached();
                    assert_is_symmetric(&layer.weight()?)?;
                    layer.forward(&input)?.sum_all()?
                };
                let mut grads = loss.backward()?;
                let report = optim.step(&mut grads)?;
                assert_eq!(report.updated, 1);
                assert_is_symmetric(&layer.weight()?)?;
            }
        }
    }
    Ok(())
}

#[test]
fn construction() {
    // Non-square matrices
    assert!(matches!(
        Symmetric::new(&[3, 2], true),
        Err(ConfigurationError::NonSquare { .. })
    ));
    assert!(matches!(
        Symmetric::new(&[1, 3], true),
        Err(ConfigurationError::NonSquare { .. })
    ));

    // A vector rather than a matrix
    assert!(matches!(
        Symmetric::new(&[4], true),
        Err(ConfigurationError::NotAMatrix { .. })
    ));

    // A non-callable transform
    assert!(matches!(
        SymF::new(&[4, 4], 4, 3.0, true),
        Err(ConfigurationError::NotCallable { .. })
    ));

    // Wrong rank
    assert!(matches!(
        SymF::new(&[4, 4], 5, Transform::identity(), true),
        Err(ConfigurationError::RankOutOfRange { rank: 5, n: 4 })
    ));
    assert!(matches!(
        SymF::new(&[4, 4], 0, Transform::identity(), true),
        Err(ConfigurationError::RankOutOfRange { rank: 0, n: 4 })
    ));

    // Vectors and non-square matrices
    assert!(matches!(
        SymF::new(&[4], 2, Transform::identity(), true),
        Err(ConfigurationError::NotAMatrix { .. })
    ));
    assert!(matches!(
        SymF::new(&[4, 3], 2, Transform::identity(), true),
        Err(ConfigurationError::NonSquare { .. })
    ));
}

#[test]
fn repr() {
    let map = Symmetric::new(&[4, 4], true).unwrap();
    println!("{map}");
    let rank_constrained = SymF::new(&[4, 4], 2, "tanh", false).unwrap();
    println!("{rank_constrained}");
    assert_eq!(
        rank_constrained.to_string(),
        "SymF(n=4, rank=2, f=tanh, lower=false)"
    );
}
