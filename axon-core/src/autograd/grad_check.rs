use crate::autograd::Graph;
use crate::error::AxonError;
use crate::nn::Layer;
use crate::tensor::Tensor;
use thiserror::Error;

/// Error type specifically for gradient checking failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradCheckError {
    #[error("Gradient check failed for {target} at element {element_index}: analytical grad {analytical_grad:?} != numerical grad {numerical_grad:?}. Difference: {difference:?}")]
    GradientMismatch {
        target: String,
        element_index: usize,
        analytical_grad: f64,
        numerical_grad: f64,
        difference: f64,
    },
    #[error("Forward function execution failed during gradient check: {0}")]
    ForwardPassError(AxonError),
    #[error("Backward pass execution failed during gradient check: {0}")]
    BackwardPassError(AxonError),
    #[error("Tensor error during intermediate calculation: {0}")]
    TensorError(AxonError),
    #[error("No analytical gradient reached {target}")]
    MissingAnalyticalGrad { target: String },
    #[error("Numerical gradient is NaN or infinite for {target}, element {element_index}. Loss+: {loss_plus:?}, Loss-: {loss_minus:?}")]
    NumericalGradNaNOrInfinite {
        target: String,
        element_index: usize,
        loss_plus: f64,
        loss_minus: f64,
    },
    #[error("Layer has no {0} to check")]
    NoParameters(Parameter),
}

impl From<AxonError> for GradCheckError {
    fn from(err: AxonError) -> Self {
        GradCheckError::TensorError(err)
    }
}

/// Which parameter tensor of a layer [`check_parameter_grad`] perturbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    Weights,
    Biases,
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Parameter::Weights => write!(f, "weights"),
            Parameter::Biases => write!(f, "biases"),
        }
    }
}

/// The scalar the checker differentiates: `Σ output · output_grad`.
///
/// Its gradient with respect to the output is exactly `output_grad`, so the
/// analytical side only needs one backward pass seeded with `output_grad`.
fn weighted_loss(output: &Tensor, output_grad: &Tensor) -> Result<f64, AxonError> {
    output.expect_size(output_grad.size(), "grad_check loss")?;
    Ok(output
        .value()
        .iter()
        .zip(output_grad.value())
        .map(|(&o, &g)| o as f64 * g as f64)
        .sum())
}

fn compare(
    target: &str,
    analytical: &[f32],
    numerical: impl Fn(usize) -> Result<(f64, f64, f64), GradCheckError>,
    tolerance: f64,
) -> Result<(), GradCheckError> {
    for (element_index, &analytical_grad) in analytical.iter().enumerate() {
        let (numerical_grad, loss_plus, loss_minus) = numerical(element_index)?;
        if !numerical_grad.is_finite() {
            return Err(GradCheckError::NumericalGradNaNOrInfinite {
                target: target.to_string(),
                element_index,
                loss_plus,
                loss_minus,
            });
        }
        let analytical_grad = analytical_grad as f64;
        let difference = (analytical_grad - numerical_grad).abs();
        let scale = 1.0f64.max(analytical_grad.abs()).max(numerical_grad.abs());
        if difference > tolerance * scale {
            return Err(GradCheckError::GradientMismatch {
                target: target.to_string(),
                element_index,
                analytical_grad,
                numerical_grad,
                difference,
            });
        }
    }
    Ok(())
}

/// Checks the analytical input gradients of `func` against central differences.
///
/// `func` receives the inputs registered as leaves of the graph it is given and
/// must record its computation in that graph. Each perturbed evaluation uses a
/// fresh graph.
pub fn check_grad<F>(
    func: F,
    inputs: &[Tensor],
    output_grad: &Tensor,
    epsilon: f64,
    tolerance: f64,
) -> Result<(), GradCheckError>
where
    F: Fn(&[Tensor], &mut Graph) -> Result<Tensor, AxonError>,
{
    let mut graph = Graph::new();
    let leaves = inputs
        .iter()
        .map(|input| graph.leaf(&input.detached()))
        .collect::<Result<Vec<_>, _>>()?;
    let output = func(&leaves, &mut graph).map_err(GradCheckError::ForwardPassError)?;
    let gradients = graph
        .gradients(&output, output_grad)
        .map_err(GradCheckError::BackwardPassError)?;

    let evaluate = |perturbed: &[Tensor]| -> Result<f64, GradCheckError> {
        let mut graph = Graph::new();
        let output = func(perturbed, &mut graph).map_err(GradCheckError::ForwardPassError)?;
        Ok(weighted_loss(&output, output_grad)?)
    };

    for (input_index, leaf) in leaves.iter().enumerate() {
        let target = format!("input {}", input_index);
        let analytical = gradients
            .wrt(leaf)
            .ok_or_else(|| GradCheckError::MissingAnalyticalGrad { target: target.clone() })?;

        compare(
            &target,
            analytical.value(),
            |element| {
                let mut perturbed: Vec<Tensor> = inputs.iter().map(Tensor::detached).collect();
                let original = perturbed[input_index].value()[element];
                perturbed[input_index].value_mut()[element] = (original as f64 + epsilon) as f32;
                let loss_plus = evaluate(&perturbed)?;
                perturbed[input_index].value_mut()[element] = (original as f64 - epsilon) as f32;
                let loss_minus = evaluate(&perturbed)?;
                Ok(((loss_plus - loss_minus) / (2.0 * epsilon), loss_plus, loss_minus))
            },
            tolerance,
        )?;
    }
    Ok(())
}

/// Checks the analytical gradient of one of `layer`'s parameter tensors.
///
/// The layer must be compiled. Its parameters are restored before returning.
pub fn check_parameter_grad(
    layer: &mut dyn Layer,
    parameter: Parameter,
    input: &Tensor,
    output_grad: &Tensor,
    epsilon: f64,
    tolerance: f64,
) -> Result<(), GradCheckError> {
    let original = match parameter {
        Parameter::Weights => layer.weights().clone(),
        Parameter::Biases => layer.biases().clone(),
    };
    if original.is_empty() {
        return Err(GradCheckError::NoParameters(parameter));
    }

    let mut graph = Graph::new();
    let output = layer
        .forward(input, &mut graph)
        .map_err(GradCheckError::ForwardPassError)?;
    let gradients = graph
        .gradients(&output, output_grad)
        .map_err(GradCheckError::BackwardPassError)?;
    let target = parameter.to_string();
    let analytical = match parameter {
        Parameter::Weights => gradients.weights.first(),
        Parameter::Biases => gradients.biases.first(),
    }
    .filter(|t| !t.is_empty())
    .cloned()
    .ok_or_else(|| GradCheckError::MissingAnalyticalGrad { target: target.clone() })?;

    let layer_cell = std::cell::RefCell::new(layer);
    let evaluate = |value: f32, element: usize| -> Result<f64, GradCheckError> {
        let mut layer = layer_cell.borrow_mut();
        let slot = match parameter {
            Parameter::Weights => layer.weights_mut(),
            Parameter::Biases => layer.biases_mut(),
        };
        slot.value_mut()[element] = value;
        let mut graph = Graph::new();
        let output = layer
            .forward(input, &mut graph)
            .map_err(GradCheckError::ForwardPassError)?;
        Ok(weighted_loss(&output, output_grad)?)
    };

    let result = compare(
        &target,
        analytical.value(),
        |element| {
            let value = original.value()[element];
            let loss_plus = evaluate((value as f64 + epsilon) as f32, element)?;
            let loss_minus = evaluate((value as f64 - epsilon) as f32, element)?;
            evaluate(value, element)?;
            Ok(((loss_plus - loss_minus) / (2.0 * epsilon), loss_plus, loss_minus))
        },
        tolerance,
    );

    let mut layer = layer_cell.borrow_mut();
    match parameter {
        Parameter::Weights => *layer.weights_mut() = original,
        Parameter::Biases => *layer.biases_mut() = original,
    }
    result
}
