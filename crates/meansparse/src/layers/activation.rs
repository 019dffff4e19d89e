//! # Activation Layer Wrapper
//!
//! [`ActivationConfig`] / [`Activation`] select among the activations used
//! by the robust classifier families, including [`Swish`].
use burn::nn::{Gelu, LeakyRelu, LeakyReluConfig, PRelu, PReluConfig, Relu, Sigmoid, Tanh};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::silu;

/// Swish activation: ``x * sigmoid(x)``.
#[derive(Module, Clone, Debug, Default)]
pub struct Swish;

impl Swish {
    /// Forward pass.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        silu(input)
    }
}

/// [`Activation`] Configuration.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum ActivationConfig {
    /// [`Relu`] activation layer.
    Relu,

    /// [`Swish`] activation layer.
    Swish,

    /// [`Gelu`] activation layer.
    Gelu,

    /// [`LeakyRelu`] activation layer.
    LeakyRelu(LeakyReluConfig),

    /// [`PRelu`] activation layer.
    PRelu(PReluConfig),

    /// [`Sigmoid`] activation layer.
    Sigmoid,

    /// [`Tanh`] activation layer.
    Tanh,
}

impl From<LeakyReluConfig> for ActivationConfig {
    fn from(config: LeakyReluConfig) -> Self {
        Self::LeakyRelu(config)
    }
}

impl From<PReluConfig> for ActivationConfig {
    fn from(config: PReluConfig) -> Self {
        Self::PRelu(config)
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self::Relu
    }
}

impl ActivationConfig {
    /// Initialize a wrapped activation layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Activation<B> {
        match self {
            ActivationConfig::Relu => Activation::Relu(Relu),
            ActivationConfig::Swish => Activation::Swish(Swish),
            ActivationConfig::Gelu => Activation::Gelu(Gelu),
            ActivationConfig::LeakyRelu(conf) => Activation::LeakyRelu(conf.init()),
            ActivationConfig::PRelu(conf) => Activation::PRelu(conf.init(device)),
            ActivationConfig::Sigmoid => Activation::Sigmoid(Sigmoid),
            ActivationConfig::Tanh => Activation::Tanh(Tanh),
        }
    }
}

/// Activation Layer Wrapper.
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Activation<B: Backend> {
    /// [`Relu`] activation layer.
    Relu(Relu),

    /// [`Swish`] activation layer.
    Swish(Swish),

    /// [`Gelu`] activation layer.
    Gelu(Gelu),

    /// [`LeakyRelu`] activation layer.
    LeakyRelu(LeakyRelu),

    /// [`PRelu`] activation layer.
    PRelu(PRelu<B>),

    /// [`Sigmoid`] activation layer.
    Sigmoid(Sigmoid),

    /// [`Tanh`] activation layer.
    Tanh(Tanh),
}

impl<B: Backend> Activation<B> {
    /// Forward pass.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Activation::Relu(layer) => layer.forward(input),
            Activation::Swish(layer) => layer.forward(input),
            Activation::Gelu(layer) => layer.forward(input),
            Activation::LeakyRelu(layer) => layer.forward(input),
            Activation::PRelu(layer) => layer.forward(input),
            Activation::Sigmoid(layer) => layer.forward(input),
            Activation::Tanh(layer) => layer.forward(input),
        }
    }

    /// Build a [`ActivationConfig`] for this module.
    pub fn to_config(&self) -> ActivationConfig {
        match self {
            Activation::Relu(_) => ActivationConfig::Relu,
            Activation::Swish(_) => ActivationConfig::Swish,
            Activation::Gelu(_) => ActivationConfig::Gelu,
            Activation::LeakyRelu(layer) => LeakyReluConfig::new()
                .with_negative_slope(layer.negative_slope)
                .into(),
            Activation::PRelu(layer) => PReluConfig::new()
                .with_alpha(layer.alpha_value)
                .with_num_parameters(layer.alpha.shape().dims[0])
                .into(),
            Activation::Sigmoid(_) => ActivationConfig::Sigmoid,
            Activation::Tanh(_) => ActivationConfig::Tanh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    fn make_input<B: Backend>(device: &B::Device) -> Tensor<B, 2> {
        Tensor::from_data([[-1.0, -0.5, 0.0], [1.0, 0.5, 0.0]], device)
    }

    fn check_stateless_config_output<B: Backend, const D: usize>(
        config: ActivationConfig,
        input: Tensor<B, D>,
        expected: Tensor<B, D>,
        device: &B::Device,
    ) {
        let act1 = config.init(device);
        let record: ActivationRecord<B> = act1.into_record();

        let act = config.init(device).load_record(record);

        let output = act.forward(input);
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_relu() {
        let device = Default::default();
        let input = make_input::<TestBackend>(&device);

        let expected = Relu::default().forward(input.clone());

        check_stateless_config_output(ActivationConfig::Relu, input, expected, &device)
    }

    #[test]
    fn test_swish() {
        let device = Default::default();
        let input = make_input::<TestBackend>(&device);

        let expected = input.clone() * burn::tensor::activation::sigmoid(input.clone());

        check_stateless_config_output(ActivationConfig::Swish, input, expected, &device)
    }

    #[test]
    fn test_swish_gradient() {
        type B = Autodiff<TestBackend>;
        let device = Default::default();

        let input: Tensor<B, 1> = Tensor::from_floats([0.0], &device).require_grad();
        let output = Swish.forward(input.clone());

        let grads = output.sum().backward();
        // d/dx x*sigmoid(x) at 0 = sigmoid(0) = 0.5
        input
            .grad(&grads)
            .unwrap()
            .to_data()
            .assert_eq(&TensorData::from([0.5f32]), true);
    }

    #[test]
    fn test_leaky_relu() {
        let device = Default::default();
        let input = make_input::<TestBackend>(&device);

        let inner_config = LeakyReluConfig::new();
        let expected = inner_config.init().forward(input.clone());

        check_stateless_config_output(
            ActivationConfig::LeakyRelu(inner_config),
            input,
            expected,
            &device,
        )
    }

    #[test]
    fn test_to_config() {
        let device = Default::default();
        for config in [
            ActivationConfig::Relu,
            ActivationConfig::Swish,
            ActivationConfig::Gelu,
            ActivationConfig::Sigmoid,
            ActivationConfig::Tanh,
        ] {
            let layer: Activation<TestBackend> = config.init(&device);
            assert_eq!(
                format!("{:?}", layer.to_config()),
                format!("{:?}", config)
            );
        }

        let layer: Activation<TestBackend> =
            ActivationConfig::from(LeakyReluConfig::new().with_negative_slope(0.2)).init(&device);
        match layer.to_config() {
            ActivationConfig::LeakyRelu(config) => assert_eq!(config.negative_slope, 0.2),
            other => panic!("unexpected config: {other:?}"),
        }
    }
}
