//! Neural network models

use std::fs;
use std::path::Path;

use candle_core::{Device, Module, Tensor, Var};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PidsimError, PidsimResult};
use crate::nn::layers::{Dense, Initializer, Layer, LayerSpec};
use crate::tensor::Sampler;

const ARCHITECTURE_FILE: &str = "architecture.json";
const WEIGHTS_FILE: &str = "weights.safetensors";

/// Activation applied after the terminal dense layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadActivation {
    Linear,
    Sigmoid,
    Relu,
}

/// Terminal layer of a sequential stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputHead {
    pub units: usize,
    pub activation: HeadActivation,
}

impl OutputHead {
    /// Single sigmoid unit, for probability outputs
    pub fn sigmoid() -> Self {
        Self {
            units: 1,
            activation: HeadActivation::Sigmoid,
        }
    }

    pub fn linear(units: usize) -> Self {
        Self {
            units,
            activation: HeadActivation::Linear,
        }
    }

    /// Single ReLU unit, for non-negative regression targets
    pub fn relu() -> Self {
        Self {
            units: 1,
            activation: HeadActivation::Relu,
        }
    }

    fn activation_layer(&self) -> Option<Layer> {
        match self.activation {
            HeadActivation::Linear => None,
            HeadActivation::Sigmoid => Some(Layer::Sigmoid),
            HeadActivation::Relu => Some(Layer::Relu),
        }
    }
}

/// Everything needed to rebuild a [`Sequential`] before loading its weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub name: String,
    pub input_dim: usize,
    pub layers: Vec<LayerSpec>,
    pub head: OutputHead,
}

/// Builder turning an ordered list of layer specifications into a network
#[derive(Debug, Clone)]
pub struct SequentialBuilder {
    name: String,
    input_dim: usize,
    base: Vec<Layer>,
    specs: Vec<LayerSpec>,
    head_kernel: Initializer,
    head_bias: f32,
}

impl SequentialBuilder {
    pub fn new(name: &str, input_dim: usize) -> Self {
        Self {
            name: name.to_string(),
            input_dim,
            base: Vec::new(),
            specs: Vec::new(),
            head_kernel: Initializer::GlorotNormal,
            head_bias: 0.0,
        }
    }

    /// Already built layers placed in front of the new specs.
    ///
    /// Their variables are shared with the source network and keep their
    /// trainable flag.
    pub fn pretrained(mut self, layers: impl IntoIterator<Item = Layer>) -> Self {
        self.base.extend(layers);
        self
    }

    pub fn layer(mut self, spec: LayerSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn layers(mut self, specs: impl IntoIterator<Item = LayerSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    pub fn head_kernel(mut self, init: Initializer) -> Self {
        self.head_kernel = init;
        self
    }

    pub fn head_bias(mut self, bias: f32) -> Self {
        self.head_bias = bias;
        self
    }

    pub fn build(
        self,
        head: OutputHead,
        sampler: &mut Sampler,
        device: &Device,
    ) -> PidsimResult<Sequential> {
        if self.input_dim == 0 {
            return Err(PidsimError::invalid_parameter(
                &format!("{} input dimension", self.name),
                0,
                "should be a positive integer",
            ));
        }
        if head.units == 0 {
            return Err(PidsimError::invalid_parameter(
                &format!("{} output units", self.name),
                0,
                "should be a positive integer",
            ));
        }

        let mut layers = Vec::with_capacity(self.base.len() + self.specs.len() + 2);
        let mut width = self.input_dim;
        let mut dense_count = 0;
        for layer in self.base.iter() {
            let layer = match layer {
                Layer::Dense(dense) => {
                    if dense.input_dim() != width {
                        return Err(PidsimError::shape_error(
                            &format!("pretrained layer with {} inputs in {}", width, self.name),
                            &format!("{} inputs", dense.input_dim()),
                            None,
                        ));
                    }
                    let renamed = dense.renamed(&format!("{}.dense_{}", self.name, dense_count));
                    dense_count += 1;
                    width = dense.output_dim();
                    Layer::Dense(renamed)
                }
                other => other.clone(),
            };
            layers.push(layer);
        }
        for spec in &self.specs {
            let layer_name = format!("{}.dense_{}", self.name, dense_count);
            if matches!(spec, LayerSpec::Dense { .. }) {
                dense_count += 1;
            }
            layers.push(spec.build(&layer_name, width, sampler, device)?);
            width = spec.output_dim(width);
        }

        layers.push(Layer::Dense(Dense::new(
            &format!("{}.output", self.name),
            width,
            head.units,
            self.head_kernel,
            self.head_bias,
            sampler,
            device,
        )?));
        if let Some(activation) = head.activation_layer() {
            layers.push(activation);
        }

        let model = Sequential {
            architecture: Architecture {
                name: self.name,
                input_dim: self.input_dim,
                layers: self
                    .base
                    .iter()
                    .map(Layer::spec)
                    .chain(self.specs)
                    .collect(),
                head,
            },
            layers,
        };
        debug!(
            "Built {} with {} parameters",
            model.name(),
            model.num_parameters()
        );
        Ok(model)
    }
}

/// Feed-forward stack of layers
#[derive(Debug, Clone)]
pub struct Sequential {
    architecture: Architecture,
    layers: Vec<Layer>,
}

impl Sequential {
    pub fn builder(name: &str, input_dim: usize) -> SequentialBuilder {
        SequentialBuilder::new(name, input_dim)
    }

    pub fn name(&self) -> &str {
        &self.architecture.name
    }

    pub fn input_dim(&self) -> usize {
        self.architecture.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.architecture.head.units
    }

    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Layers in front of the output head
    pub fn hidden_layers(&self) -> &[Layer] {
        let head_len = match self.architecture.head.activation {
            HeadActivation::Linear => 1,
            _ => 2,
        };
        &self.layers[..self.layers.len().saturating_sub(head_len)]
    }

    /// Trainable variables, kernels before biases, in layer order
    pub fn vars(&self) -> Vec<Var> {
        self.layers
            .iter()
            .filter(|layer| layer.is_trainable())
            .flat_map(|layer| layer.vars())
            .map(|(_, var)| var)
            .collect()
    }

    /// Every variable, frozen ones included
    pub fn named_vars(&self) -> Vec<(String, Var)> {
        self.layers.iter().flat_map(|layer| layer.vars()).collect()
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|layer| layer.num_parameters()).sum()
    }

    pub fn num_trainable_parameters(&self) -> usize {
        self.layers
            .iter()
            .filter(|layer| layer.is_trainable())
            .map(|layer| layer.num_parameters())
            .sum()
    }

    /// Forward pass with a check on the input width
    pub fn apply(&self, input: &Tensor) -> PidsimResult<Tensor> {
        self.check_input(input)?;
        Ok(self.forward(input)?)
    }

    /// Gradient of `sum(output * grad_output)` with respect to `input`.
    ///
    /// The result is built from differentiable ops and can itself be
    /// back-propagated to the weights of the network.
    pub fn input_gradient(&self, input: &Tensor, grad_output: &Tensor) -> PidsimResult<Tensor> {
        self.check_input(input)?;
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        let mut current = input.clone();
        for layer in &self.layers {
            let next = layer.forward(&current)?;
            activations.push(current);
            current = next;
        }
        if current.dims() != grad_output.dims() {
            return Err(PidsimError::shape_error(
                &format!("{:?}", current.dims()),
                &format!("{:?}", grad_output.dims()),
                Some("the upstream gradient must match the network output"),
            ));
        }
        activations.push(current);

        let mut grad = grad_output.clone();
        for (idx, layer) in self.layers.iter().enumerate().rev() {
            grad = layer.input_gradient(&activations[idx], &activations[idx + 1], &grad)?;
        }
        Ok(grad)
    }

    /// Flattened copy of every parameter, mostly useful to compare snapshots
    pub fn parameters_flat(&self) -> PidsimResult<Vec<f32>> {
        let mut values = Vec::with_capacity(self.num_parameters());
        for (_, var) in self.named_vars() {
            values.extend(var.as_tensor().flatten_all()?.to_vec1::<f32>()?);
        }
        Ok(values)
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Model: \"{}\" (input dim {})",
            self.name(),
            self.input_dim()
        )];
        let mut width = self.input_dim();
        for layer in &self.layers {
            if let Layer::Dense(dense) = layer {
                width = dense.output_dim();
            }
            lines.push(format!(
                "  {:<12} output [None, {}]  params {}",
                layer.kind(),
                width,
                layer.num_parameters()
            ));
        }
        lines.push(format!("Total params: {}", self.num_parameters()));
        lines.push(format!("Trainable params: {}", self.num_trainable_parameters()));
        lines.join("\n")
    }

    /// Write the architecture and the weights into `dir`
    pub fn save(&self, dir: &Path) -> PidsimResult<()> {
        fs::create_dir_all(dir)?;
        let architecture = serde_json::to_string_pretty(&self.architecture)?;
        fs::write(dir.join(ARCHITECTURE_FILE), architecture)?;

        self.var_map()?.save(dir.join(WEIGHTS_FILE))?;
        debug!("Saved {} to {}", self.name(), dir.display());
        Ok(())
    }

    /// Rebuild a network saved with [`Sequential::save`]
    pub fn load(dir: &Path, device: &Device) -> PidsimResult<Self> {
        let path = dir.join(ARCHITECTURE_FILE);
        if !path.exists() {
            return Err(PidsimError::Io(format!(
                "no saved model found at {}",
                dir.display()
            )));
        }
        let architecture: Architecture = serde_json::from_str(&fs::read_to_string(path)?)?;
        let mut sampler = Sampler::seeded(0);
        let model = SequentialBuilder::new(&architecture.name, architecture.input_dim)
            .layers(architecture.layers.clone())
            .head_kernel(Initializer::Zeros)
            .build(architecture.head, &mut sampler, device)?;
        model.load_weights(&dir.join(WEIGHTS_FILE))?;
        Ok(model)
    }

    /// Overwrite the current weights with the tensors stored at `path`
    pub fn load_weights(&self, path: &Path) -> PidsimResult<()> {
        self.var_map()?.load(path).map_err(|e| {
            PidsimError::Serialization(format!("cannot restore {} from {}: {}", self.name(), path.display(), e))
        })
    }

    /// Named view over the variables, sharing their storage
    fn var_map(&self) -> PidsimResult<VarMap> {
        let map = VarMap::new();
        {
            let mut data = map
                .data()
                .lock()
                .map_err(|_| PidsimError::IllegalState("variable map lock poisoned".to_string()))?;
            data.extend(self.named_vars());
        }
        Ok(map)
    }

    fn check_input(&self, input: &Tensor) -> PidsimResult<()> {
        let (_, cols) = input.dims2()?;
        if cols != self.input_dim() {
            return Err(PidsimError::shape_error(
                &format!("[batch, {}] input for {}", self.input_dim(), self.name()),
                &format!("{:?}", input.dims()),
                None,
            ));
        }
        Ok(())
    }
}

impl Module for Sequential {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.layers
            .iter()
            .try_fold(xs.clone(), |hidden, layer| layer.forward(&hidden))
    }
}
