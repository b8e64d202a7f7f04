//! Neural Network inference.

use std::{borrow::Cow, ops::Index, path::Path, sync::Arc};

use anyhow::{bail, Context};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::image::{sample, Rect};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Neural network loader.
pub struct Loader<'a> {
    model_data: Cow<'a, [u8]>,
    input_shape: Option<Vec<usize>>,
    outputs: Option<Vec<usize>>,
}

impl<'a> Loader<'a> {
    fn new(data: Cow<'a, [u8]>) -> Self {
        Self {
            model_data: data,
            input_shape: None,
            outputs: None,
        }
    }

    /// Pins the shape of the network's first input.
    ///
    /// Networks exported with a symbolic batch dimension (common for classifiers) need this before
    /// they can be optimized.
    pub fn with_input_shape<S>(mut self, shape: S) -> Self
    where
        S: Into<Vec<usize>>,
    {
        self.input_shape = Some(shape.into());
        self
    }

    /// Only compute the specified outputs during inference.
    ///
    /// This takes a list of [`usize`]s corresponding to network output indices. When called, the
    /// [`Outputs`] returned from [`NeuralNetwork::estimate`] will only contain the chosen output
    /// tensors, in the given order.
    pub fn with_output_selection<O>(mut self, outputs: O) -> Self
    where
        O: Into<Vec<usize>>,
    {
        self.outputs = Some(outputs.into());
        self
    }

    /// Loads and optimizes the network.
    ///
    /// Returns an error if the network data is malformed, if the network data is incomplete, or if
    /// the network uses unimplemented operations.
    pub fn load(self) -> anyhow::Result<NeuralNetwork> {
        let mut model = tract_onnx::onnx().model_for_read(&mut &*self.model_data)?;
        if let Some(shape) = self.input_shape {
            model = model.with_input_fact(0, f32::fact(shape).into())?;
        }

        let graph = model.into_optimized()?;
        let outputs = graph.output_outlets()?;
        let selected_outputs = match self.outputs {
            Some(indices) => indices
                .iter()
                .map(|&i| {
                    outputs
                        .get(i)
                        .copied()
                        .with_context(|| format!("network has no output #{i}"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            None => outputs.to_vec(),
        };
        let model = SimplePlan::new_for_outputs(graph, &selected_outputs)?;

        Ok(NeuralNetwork(Arc::new(model)))
    }
}

/// A neural network that can be used for inference.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<Model>);

impl NeuralNetwork {
    /// Loads a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension.
    pub fn from_path<'a, P: AsRef<Path>>(path: P) -> anyhow::Result<Loader<'a>> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl<'a>(path: &Path) -> anyhow::Result<Loader<'a>> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!(
                "neural network file '{}' must have `.onnx` extension",
                path.display()
            ),
        }

        let model_data = std::fs::read(path)
            .with_context(|| format!("failed to read network '{}'", path.display()))?;
        Ok(Loader::new(model_data.into()))
    }

    /// Returns the number of input nodes of the network.
    pub fn num_inputs(&self) -> usize {
        self.0.model().inputs.len()
    }

    /// Returns the concrete shape of input `index`.
    pub fn input_shape(&self, index: usize) -> anyhow::Result<&[usize]> {
        let fact = self.0.model().input_fact(index)?;
        fact.shape
            .as_concrete()
            .with_context(|| format!("network input #{index} has a symbolic shape"))
    }

    /// Runs the network on a list of input tensors, returning the estimated [`Outputs`].
    #[doc(alias = "infer")]
    pub fn estimate<I>(&self, inputs: I) -> anyhow::Result<Outputs>
    where
        I: IntoIterator<Item = Tensor>,
    {
        let inner = self.0.run(
            inputs
                .into_iter()
                .map(|t| TValue::from_const(Arc::new(t)))
                .collect(),
        )?;
        Ok(Outputs { inner })
    }
}

/// Maps 8-bit sRGB color channels into the value range a network was trained on.
#[derive(Debug, Clone)]
pub struct ColorMapper {
    start: f32,
    end: f32,
}

impl ColorMapper {
    /// Creates a color mapper that uniformly maps channel values to `start..=end`.
    pub fn linear(start: f32, end: f32) -> Self {
        assert!(end > start);
        Self { start, end }
    }

    fn map(&self, channel: u8) -> f32 {
        channel as f32 * ((self.end - self.start) / 255.0) + self.start
    }
}

/// Describes in what order a CNN expects its input image data.
///
/// - `N` is the number of images, fixed at 1.
/// - `C` is the number of color channels, 3 for RGB inputs.
/// - `H` and `W` are the height and width of the input, respectively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CnnInputShape {
    /// Shape is `[N, C, H, W]`.
    NCHW,
    /// Shape is `[N, H, W, C]`.
    NHWC,
}

impl CnnInputShape {
    /// Determines the layout of an RGB image input from its tensor shape, along with the input's
    /// `(width, height)`.
    ///
    /// Networks converted from TensorFlow Lite usually keep NHWC, while PyTorch exports are NCHW.
    /// A shape that fits both (`[1, 3, 3, 3]`) is treated as NCHW.
    pub fn detect(shape: &[usize]) -> Option<(Self, usize, usize)> {
        match *shape {
            [1, 3, h, w] => Some((Self::NCHW, w, h)),
            [1, h, w, 3] => Some((Self::NHWC, w, h)),
            _ => None,
        }
    }
}

/// A convolutional neural network (CNN) that operates on image data.
///
/// Like the underlying [`NeuralNetwork`], this is a cheaply [`Clone`]able handle.
#[derive(Clone)]
pub struct Cnn {
    nn: NeuralNetwork,
    shape: CnnInputShape,
    width: u32,
    height: u32,
    color_mapper: Arc<ColorMapper>,
}

impl Cnn {
    /// Creates a CNN wrapper from a [`NeuralNetwork`].
    ///
    /// The network must have exactly one RGB image input. Its [`CnnInputShape`] is derived from
    /// the input's tensor shape.
    pub fn new(nn: NeuralNetwork, color_mapper: ColorMapper) -> anyhow::Result<Self> {
        if nn.num_inputs() != 1 {
            bail!(
                "CNN network has to take exactly 1 input, this one takes {}",
                nn.num_inputs(),
            );
        }

        let tensor_shape = nn.input_shape(0)?;
        let Some((shape, w, h)) = CnnInputShape::detect(tensor_shape) else {
            bail!("invalid model input shape for RGB CNN: {:?}", tensor_shape);
        };

        Ok(Self {
            nn,
            shape,
            width: w.try_into()?,
            height: h.try_into()?,
            color_mapper: Arc::new(color_mapper),
        })
    }

    /// Returns the expected input image size as `(width, height)`.
    #[inline]
    pub fn input_resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Returns the aspect ratio (`width / height`) of the network input.
    pub fn input_aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Runs the network on the region `roi` of `image`.
    ///
    /// The region is sampled to create the network's input tensor. Parts of `roi` outside of the
    /// image are filled with black. If the region's aspect ratio does not match the network's
    /// input, the region will be stretched, so callers should use [`Rect::grow_to_fit_aspect`]
    /// first.
    pub fn estimate(&self, image: &RgbImage, roi: &Rect) -> anyhow::Result<Outputs> {
        let (w, h) = (self.width as usize, self.height as usize);
        let pixels = (0..h)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .map(|(x, y)| {
                let (px, py) = roi.transform_out(
                    (x as f32 + 0.5) / w as f32,
                    (y as f32 + 0.5) / h as f32,
                );
                sample(image, px, py).0.map(|c| self.color_mapper.map(c))
            })
            .collect::<Vec<[f32; 3]>>();

        self.nn.estimate([image_tensor(self.shape, (w, h), &pixels)])
    }
}

/// Arranges row-major RGB `pixels` of a `w` by `h` image into a tensor of the given layout.
fn image_tensor(shape: CnnInputShape, (w, h): (usize, usize), pixels: &[[f32; 3]]) -> Tensor {
    match shape {
        CnnInputShape::NCHW => {
            tract_ndarray::Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| pixels[y * w + x][c])
                .into()
        }
        CnnInputShape::NHWC => {
            tract_ndarray::Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| pixels[y * w + x][c])
                .into()
        }
    }
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
pub struct Outputs {
    inner: TVec<TValue>,
}

impl Outputs {
    /// Wraps a list of tensors, as if a network had produced them.
    pub fn from_tensors<I: IntoIterator<Item = Tensor>>(tensors: I) -> Self {
        Self {
            inner: tensors
                .into_iter()
                .map(|t| TValue::from_const(Arc::new(t)))
                .collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Tensor> {
        self.inner.get(index).map(|value| &**value)
    }

    /// Returns output `index` as a flat `f32` slice, after checking its shape.
    pub fn f32_slice(&self, index: usize, shape: &[usize]) -> anyhow::Result<&[f32]> {
        let tensor = self
            .get(index)
            .with_context(|| format!("network output #{index} is missing"))?;
        if tensor.shape() != shape {
            bail!(
                "network output #{index} has shape {:?}, expected {:?}",
                tensor.shape(),
                shape
            );
        }
        tensor.as_slice::<f32>()
    }
}

impl Index<usize> for Outputs {
    type Output = Tensor;

    fn index(&self, index: usize) -> &Tensor {
        &self.inner[index]
    }
}
