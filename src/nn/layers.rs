//! Neural network layers
//!
//! Every layer knows its forward transform and the vector-Jacobian product
//! with respect to its input. The latter is written with ordinary tensor ops,
//! so the gradient of a network output with respect to its input stays
//! differentiable with respect to the network weights.

use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::Linear;
use serde::{Deserialize, Serialize};

use crate::error::{PidsimError, PidsimResult};
use crate::tensor::Sampler;

/// Declarative description of one layer of a sequential stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Dense { units: usize },
    LeakyRelu { alpha: f64 },
    Relu,
    Sigmoid,
    Tanh,
}

impl LayerSpec {
    pub fn dense(units: usize) -> Self {
        LayerSpec::Dense { units }
    }

    pub fn leaky_relu(alpha: f64) -> Self {
        LayerSpec::LeakyRelu { alpha }
    }

    /// Width of the layer output given the width of its input
    pub fn output_dim(&self, input_dim: usize) -> usize {
        match self {
            LayerSpec::Dense { units } => *units,
            _ => input_dim,
        }
    }

    pub fn validate(&self) -> PidsimResult<()> {
        match self {
            LayerSpec::Dense { units } if *units == 0 => Err(PidsimError::invalid_parameter(
                "units",
                units,
                "should be a positive integer",
            )),
            LayerSpec::LeakyRelu { alpha } if !(0.0..1.0).contains(alpha) => Err(
                PidsimError::invalid_parameter("alpha", alpha, "should lie in [0, 1)"),
            ),
            _ => Ok(()),
        }
    }

    pub(crate) fn build(
        &self,
        name: &str,
        input_dim: usize,
        sampler: &mut Sampler,
        device: &Device,
    ) -> PidsimResult<Layer> {
        self.validate()?;
        let layer = match self {
            LayerSpec::Dense { units } => Layer::Dense(Dense::new(
                name,
                input_dim,
                *units,
                Initializer::GlorotUniform,
                0.0,
                sampler,
                device,
            )?),
            LayerSpec::LeakyRelu { alpha } => Layer::LeakyRelu { alpha: *alpha },
            LayerSpec::Relu => Layer::Relu,
            LayerSpec::Sigmoid => Layer::Sigmoid,
            LayerSpec::Tanh => Layer::Tanh,
        };
        Ok(layer)
    }
}

/// `num_layers` fully connected layers of width `units`, each followed by a leaky ReLU
pub fn mlp_specs(num_layers: usize, units: usize, alpha: f64) -> Vec<LayerSpec> {
    (0..num_layers)
        .flat_map(|_| [LayerSpec::dense(units), LayerSpec::leaky_relu(alpha)])
        .collect()
}

/// Kernel initialisation schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    GlorotUniform,
    GlorotNormal,
    Zeros,
}

impl Initializer {
    fn sample(&self, fan_in: usize, fan_out: usize, sampler: &mut Sampler) -> Vec<f32> {
        let len = fan_in * fan_out;
        let fans = (fan_in + fan_out) as f32;
        match self {
            Initializer::GlorotUniform => {
                let limit = (6.0 / fans).sqrt();
                sampler.uniform_vec(len, -limit, limit)
            }
            Initializer::GlorotNormal => sampler.normal_vec(len, 0.0, (2.0 / fans).sqrt()),
            Initializer::Zeros => vec![0.0; len],
        }
    }
}

/// Fully connected layer, `y = x W^T + b` with `W` of shape `[out, in]`.
///
/// The forward pass is a [`candle_nn::Linear`] over the two variables, so
/// optimizer updates to the variables are seen by the layer.
#[derive(Debug, Clone)]
pub struct Dense {
    name: String,
    weight: Var,
    bias: Var,
    linear: Linear,
    trainable: bool,
}

impl Dense {
    pub fn new(
        name: &str,
        input_dim: usize,
        output_dim: usize,
        kernel_init: Initializer,
        bias_init: f32,
        sampler: &mut Sampler,
        device: &Device,
    ) -> PidsimResult<Self> {
        if input_dim == 0 || output_dim == 0 {
            return Err(PidsimError::shape_error(
                "non-empty dense layer",
                &format!("[{}, {}]", output_dim, input_dim),
                None,
            ));
        }
        let kernel = kernel_init.sample(input_dim, output_dim, sampler);
        let weight = Var::from_tensor(&Tensor::from_vec(kernel, (output_dim, input_dim), device)?)?;
        let bias = Var::from_tensor(&Tensor::full(bias_init, output_dim, device)?)?;
        let linear = Linear::new(weight.as_tensor().clone(), Some(bias.as_tensor().clone()));
        Ok(Self {
            name: name.to_string(),
            weight,
            bias,
            linear,
            trainable: true,
        })
    }

    /// Same variables under another name
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_dim(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn output_dim(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn weight(&self) -> &Var {
        &self.weight
    }

    pub fn bias(&self) -> &Var {
        &self.bias
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.elem_count() + self.bias.elem_count()
    }
}

impl Module for Dense {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.linear.forward(xs)
    }
}

/// A built layer of a [`crate::nn::Sequential`]
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    LeakyRelu { alpha: f64 },
    Relu,
    Sigmoid,
    Tanh,
}

impl Layer {
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Dense(_) => "Dense",
            Layer::LeakyRelu { .. } => "LeakyReLU",
            Layer::Relu => "ReLU",
            Layer::Sigmoid => "Sigmoid",
            Layer::Tanh => "Tanh",
        }
    }

    /// Specification rebuilding a layer of the same shape
    pub fn spec(&self) -> LayerSpec {
        match self {
            Layer::Dense(dense) => LayerSpec::dense(dense.output_dim()),
            Layer::LeakyRelu { alpha } => LayerSpec::leaky_relu(*alpha),
            Layer::Relu => LayerSpec::Relu,
            Layer::Sigmoid => LayerSpec::Sigmoid,
            Layer::Tanh => LayerSpec::Tanh,
        }
    }

    /// Layers without variables are always trainable
    pub fn is_trainable(&self) -> bool {
        match self {
            Layer::Dense(dense) => dense.is_trainable(),
            _ => true,
        }
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        if let Layer::Dense(dense) = self {
            dense.set_trainable(trainable);
        }
    }

    /// Every variable of the layer, trainable or not
    pub fn vars(&self) -> Vec<(String, Var)> {
        match self {
            Layer::Dense(dense) => vec![
                (format!("{}.weight", dense.name), dense.weight.clone()),
                (format!("{}.bias", dense.name), dense.bias.clone()),
            ],
            _ => Vec::new(),
        }
    }

    pub fn num_parameters(&self) -> usize {
        match self {
            Layer::Dense(dense) => dense.num_parameters(),
            _ => 0,
        }
    }

    /// Back-propagate `grad_output` through the layer.
    ///
    /// `input` and `output` are the tensors seen during the forward pass.
    pub fn input_gradient(
        &self,
        input: &Tensor,
        output: &Tensor,
        grad_output: &Tensor,
    ) -> candle_core::Result<Tensor> {
        match self {
            Layer::Dense(dense) => grad_output.matmul(dense.linear.weight()),
            Layer::LeakyRelu { alpha } => {
                let positive = input.ge(&input.zeros_like()?)?.to_dtype(input.dtype())?;
                let slope = positive.affine(1.0 - alpha, *alpha)?;
                grad_output.mul(&slope)
            }
            Layer::Relu => {
                let positive = input.gt(&input.zeros_like()?)?.to_dtype(input.dtype())?;
                grad_output.mul(&positive)
            }
            Layer::Sigmoid => {
                let slope = output.mul(&output.affine(-1.0, 1.0)?)?;
                grad_output.mul(&slope)
            }
            Layer::Tanh => {
                let slope = output.sqr()?.affine(-1.0, 1.0)?;
                grad_output.mul(&slope)
            }
        }
    }
}

impl Module for Layer {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Layer::Dense(dense) => dense.forward(xs),
            Layer::LeakyRelu { alpha } => xs.maximum(&xs.affine(*alpha, 0.0)?),
            Layer::Relu => xs.relu(),
            Layer::Sigmoid => candle_nn::ops::sigmoid(xs),
            Layer::Tanh => xs.tanh(),
        }
    }
}

pub(crate) fn ensure_f32(t: &Tensor) -> candle_core::Result<Tensor> {
    if t.dtype() == DType::F32 {
        Ok(t.clone())
    } else {
        t.to_dtype(DType::F32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dense(input: usize, output: usize) -> Dense {
        let mut sampler = Sampler::seeded(0);
        Dense::new("d", input, output, Initializer::GlorotUniform, 0.5, &mut sampler, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_dense_forward_shape() {
        let layer = dense(3, 5);
        let x = Tensor::ones((4, 3), DType::F32, &Device::Cpu).unwrap();
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.dims2().unwrap(), (4, 5));
        assert_eq!(layer.num_parameters(), 20);
    }

    #[test]
    fn test_leaky_relu_forward() {
        let x = Tensor::new(&[[-2.0f32, 0.0, 3.0]], &Device::Cpu).unwrap();
        let y = Layer::LeakyRelu { alpha: 0.1 }.forward(&x).unwrap();
        let y = y.to_vec2::<f32>().unwrap();
        assert_relative_eq!(y[0][0], -0.2, epsilon = 1e-6);
        assert_relative_eq!(y[0][2], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_input_gradient_matches_autograd() {
        // A hand-written VJP must agree with candle's backward pass
        let layer = Layer::Dense(dense(3, 2));
        let activations = [
            Layer::LeakyRelu { alpha: 0.2 },
            Layer::Sigmoid,
            Layer::Tanh,
        ];
        let x = Var::new(&[[0.3f32, -1.2, 0.7], [1.5, 0.1, -0.4]], &Device::Cpu).unwrap();
        for activation in activations {
            let hidden = layer.forward(x.as_tensor()).unwrap();
            let out = activation.forward(&hidden).unwrap();
            let grads = out.sum_all().unwrap().backward().unwrap();
            let expected = grads.get(x.as_tensor()).unwrap().to_vec2::<f32>().unwrap();

            let ones = out.ones_like().unwrap();
            let g = activation.input_gradient(&hidden, &out, &ones).unwrap();
            let g = layer.input_gradient(x.as_tensor(), &hidden, &g).unwrap();
            let got = g.to_vec2::<f32>().unwrap();
            for (e, o) in expected.iter().flatten().zip(got.iter().flatten()) {
                assert_relative_eq!(e, o, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_dense_follows_variable_updates() {
        let layer = dense(2, 1);
        let x = Tensor::ones((1, 2), DType::F32, &Device::Cpu).unwrap();
        layer.weight().set(&Tensor::new(&[[1.0f32, 2.0]], &Device::Cpu).unwrap()).unwrap();
        let y = layer.forward(&x).unwrap().to_vec2::<f32>().unwrap();
        assert_relative_eq!(y[0][0], 3.5, epsilon = 1e-6);
    }

    #[test]
    fn test_trainable_flag() {
        let mut layer = Layer::Dense(dense(3, 2));
        assert!(layer.is_trainable());
        layer.set_trainable(false);
        assert!(!layer.is_trainable());
        assert_eq!(layer.vars().len(), 2);
        assert_eq!(layer.spec(), LayerSpec::dense(2));

        let renamed = match &layer {
            Layer::Dense(d) => d.renamed("other"),
            _ => unreachable!(),
        };
        assert_eq!(renamed.name(), "other");
        assert!(!renamed.is_trainable());

        let mut activation = Layer::LeakyRelu { alpha: 0.1 };
        activation.set_trainable(false);
        assert!(activation.is_trainable());
    }

    #[test]
    fn test_spec_validation() {
        assert!(LayerSpec::dense(0).validate().is_err());
        assert!(LayerSpec::leaky_relu(1.5).validate().is_err());
        assert!(LayerSpec::leaky_relu(0.1).validate().is_ok());
        assert_eq!(mlp_specs(3, 8, 0.1).len(), 6);
    }

    #[test]
    fn test_spec_serde() {
        let spec: LayerSpec = serde_json::from_str(r#"{"type": "dense", "units": 16}"#).unwrap();
        assert_eq!(spec, LayerSpec::dense(16));
        let spec: LayerSpec = serde_json::from_str(r#"{"type": "relu"}"#).unwrap();
        assert_eq!(spec, LayerSpec::Relu);
    }
}
