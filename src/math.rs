// math.rs
// Description: Matrix primitives shared by every layer: leaky ReLU, causal mask, row softmax,
//              row sums, gradient descent step, horizontal concat and split, dropout masks,
//              Xavier and He initializers, one hot encoding and cross entropy.
//              All functions are stateless and check shapes instead of panicking.
// History:
// - 2026-10-18: Move to f64 matrices with Result based shape checks.
// - 2026-10-18: Add concat/split helpers for per head attention.

use ndarray::{concatenate, s, Array1, Array2, ArrayBase, Axis, Data, DataMut, Ix2, Zip};
use rand::distr::Uniform;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{LlmError, Result};

/// Slope of the leaky ReLU for negative inputs.
pub const LEAKY_ALPHA: f64 = 0.01;

/// Lower clamp for probabilities inside the log of the cross entropy.
pub const LOG_CLAMP: f64 = 1e-8;

pub fn leaky_relu(a_x: &Array2<f64>) -> Array2<f64> {
    a_x.mapv(|d| if d >= 0.0 { d } else { d * LEAKY_ALPHA })
}

pub fn leaky_relu_deriv(a_x: &Array2<f64>) -> Array2<f64> {
    a_x.mapv(|d| if d >= 0.0 { 1.0 } else { LEAKY_ALPHA })
}

// Upper triangle (j > i) becomes -inf.
pub fn apply_causal_mask_inplace(a_scores: &mut Array2<f64>) {
    for ((i, j), d) in a_scores.indexed_iter_mut() {
        if j > i {
            *d = f64::NEG_INFINITY;
        }
    }
}

pub fn causal_mask(a_scores: &Array2<f64>) -> Array2<f64> {
    let mut a_out = a_scores.clone();
    apply_causal_mask_inplace(&mut a_out);
    a_out
}

/// Row wise softmax with the row maximum subtracted before exponentiation.
pub fn softmax_rows(a_x: &Array2<f64>) -> Array2<f64> {
    let mut a_out = a_x.clone();
    for mut a_row in a_out.rows_mut() {
        let d_max = a_row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        a_row.mapv_inplace(|d| (d - d_max).exp());
        let d_sum: f64 = a_row.iter().sum();
        a_row.mapv_inplace(|d| d / d_sum);
    }
    a_out
}

pub fn row_sums(a_x: &Array2<f64>) -> Array1<f64> {
    a_x.sum_axis(Axis(1))
}

/// Subtracts `v_row_values[i]` from every entry of row `i`.
pub fn sub_per_row(a_x: &Array2<f64>, v_row_values: &Array1<f64>) -> Result<Array2<f64>> {
    if v_row_values.len() != a_x.nrows() {
        return Err(LlmError::dims(
            "sub_per_row",
            format!("{} rows vs {} values", a_x.nrows(), v_row_values.len()),
        ));
    }
    let mut a_out = a_x.clone();
    for (mut a_row, &d_value) in a_out.rows_mut().into_iter().zip(v_row_values.iter()) {
        a_row -= d_value;
    }
    Ok(a_out)
}

pub fn matmul<S1, S2>(a_lhs: &ArrayBase<S1, Ix2>, a_rhs: &ArrayBase<S2, Ix2>) -> Result<Array2<f64>>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    if a_lhs.ncols() != a_rhs.nrows() {
        return Err(LlmError::shapes("matmul", a_lhs.dim(), a_rhs.dim()));
    }
    Ok(a_lhs.dot(a_rhs))
}

pub fn ensure_same_dims<S1, S2>(
    op: &'static str,
    a_lhs: &ArrayBase<S1, Ix2>,
    a_rhs: &ArrayBase<S2, Ix2>,
) -> Result<()>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    if a_lhs.dim() != a_rhs.dim() {
        return Err(LlmError::shapes(op, a_lhs.dim(), a_rhs.dim()));
    }
    Ok(())
}

/// Hadamard product.
pub fn mul_elem(a_lhs: &Array2<f64>, a_rhs: &Array2<f64>) -> Result<Array2<f64>> {
    ensure_same_dims("mul_elem", a_lhs, a_rhs)?;
    Ok(a_lhs * a_rhs)
}

pub fn add_inplace(a_target: &mut Array2<f64>, a_other: &Array2<f64>) -> Result<()> {
    ensure_same_dims("add", a_target, a_other)?;
    *a_target += a_other;
    Ok(())
}

/// Gradient descent step: `param -= lr * grad`, in place.
pub fn sgd_step<S>(a_param: &mut ArrayBase<S, Ix2>, a_grad: &Array2<f64>, d_lr: f64) -> Result<()>
where
    S: DataMut<Elem = f64>,
{
    if a_param.dim() != a_grad.dim() {
        return Err(LlmError::shapes("sgd_step", a_param.dim(), a_grad.dim()));
    }
    Zip::from(a_param).and(a_grad).for_each(|d_p, &d_g| {
        *d_p -= d_lr * d_g;
    });
    Ok(())
}

/// Joins two matrices side by side. An empty operand passes the other through.
pub fn concat(a_left: &Array2<f64>, a_right: &Array2<f64>) -> Result<Array2<f64>> {
    if a_right.is_empty() {
        return Ok(a_left.clone());
    }
    if a_left.is_empty() {
        return Ok(a_right.clone());
    }
    if a_left.nrows() != a_right.nrows() {
        return Err(LlmError::shapes("concat", a_left.dim(), a_right.dim()));
    }
    concatenate(Axis(1), &[a_left.view(), a_right.view()])
        .map_err(|e| LlmError::dims("concat", e.to_string()))
}

/// Concatenates all parts in order.
pub fn concat_all(v_parts: &[Array2<f64>]) -> Result<Array2<f64>> {
    let mut a_out = Array2::<f64>::zeros((0, 0));
    for a_part in v_parts {
        a_out = concat(&a_out, a_part)?;
    }
    Ok(a_out)
}

/// Splits columns into `i_parts` equal slices. An empty matrix yields no parts.
pub fn split(a_x: &Array2<f64>, i_parts: usize) -> Result<Vec<Array2<f64>>> {
    if a_x.is_empty() {
        return Ok(Vec::new());
    }
    if i_parts == 0 || a_x.ncols() % i_parts != 0 {
        return Err(LlmError::dims(
            "split",
            format!("{} columns into {} parts", a_x.ncols(), i_parts),
        ));
    }
    let i_width = a_x.ncols() / i_parts;
    Ok((0..i_parts)
        .map(|i_part| {
            a_x.slice(s![.., i_part * i_width..(i_part + 1) * i_width])
                .to_owned()
        })
        .collect())
}

/// Inverted dropout mask: 0 with probability `p`, otherwise `1 / (1 - p)`.
pub fn dropout_mask(i_rows: usize, i_cols: usize, d_p: f64) -> Array2<f64> {
    let d_p = if d_p.is_nan() { 0.0 } else { d_p.clamp(0.0, 1.0) };
    let d_keep_scale = 1.0 / (1.0 - d_p);
    let mut rng = rand::rng();
    Array2::from_shape_fn((i_rows, i_cols), |_| {
        if rng.random::<f64>() < d_p {
            0.0
        } else {
            d_keep_scale
        }
    })
}

/// Uniform in `[-sqrt(6)/sqrt(r+c), sqrt(6)/sqrt(r+c))`.
pub fn xavier<R: Rng + ?Sized>(i_rows: usize, i_cols: usize, rng: &mut R) -> Result<Array2<f64>> {
    if i_rows == 0 || i_cols == 0 {
        return Ok(Array2::zeros((i_rows, i_cols)));
    }
    let d_limit = 6.0_f64.sqrt() / ((i_rows + i_cols) as f64).sqrt();
    let dist = Uniform::new(-d_limit, d_limit)
        .map_err(|e| LlmError::InvalidParameter(format!("xavier: {e}")))?;
    Ok(Array2::from_shape_fn((i_rows, i_cols), |_| dist.sample(&mut *rng)))
}

/// Normal with mean 0 and standard deviation `sqrt(2/r)`.
pub fn he<R: Rng + ?Sized>(i_rows: usize, i_cols: usize, rng: &mut R) -> Result<Array2<f64>> {
    if i_rows == 0 || i_cols == 0 {
        return Ok(Array2::zeros((i_rows, i_cols)));
    }
    let d_std = (2.0 / i_rows as f64).sqrt();
    let dist =
        Normal::new(0.0, d_std).map_err(|e| LlmError::InvalidParameter(format!("he: {e}")))?;
    Ok(Array2::from_shape_fn((i_rows, i_cols), |_| dist.sample(&mut *rng)))
}

pub fn one_hot(v_indices: &[usize], i_len: usize) -> Result<Array2<f64>> {
    let mut a_out = Array2::zeros((v_indices.len(), i_len));
    for (i_row, &i_index) in v_indices.iter().enumerate() {
        if i_index >= i_len {
            return Err(LlmError::dims(
                "one_hot",
                format!("index {i_index} out of range for length {i_len}"),
            ));
        }
        a_out[[i_row, i_index]] = 1.0;
    }
    Ok(a_out)
}

/// `-mean_rows(sum_j target_ij * log(clamp(pred_ij, 1e-8, 1)))`.
pub fn cross_entropy(a_pred: &Array2<f64>, a_target: &Array2<f64>) -> Result<f64> {
    ensure_same_dims("cross_entropy", a_pred, a_target)?;
    if a_target.nrows() == 0 {
        return Ok(0.0);
    }
    let mut d_sum = 0.0;
    Zip::from(a_pred).and(a_target).for_each(|&d_p, &d_t| {
        if d_t != 0.0 {
            d_sum += d_t * d_p.clamp(LOG_CLAMP, 1.0).ln();
        }
    });
    Ok(-(d_sum / a_target.nrows() as f64))
}

/// Column index of the largest entry in every row.
pub fn argmax_rows(a_x: &Array2<f64>) -> Vec<usize> {
    a_x.rows()
        .into_iter()
        .map(|a_row| {
            a_row
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |(i_best, d_best), (i, &d)| {
                    if d > d_best {
                        (i, d)
                    } else {
                        (i_best, d_best)
                    }
                })
                .0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_close(a_got: &Array2<f64>, a_want: &Array2<f64>, d_tol: f64) {
        assert_eq!(a_got.dim(), a_want.dim());
        for (d_g, d_w) in a_got.iter().zip(a_want.iter()) {
            assert!(
                (d_g - d_w).abs() <= d_tol,
                "expected {a_want:?}, got {a_got:?}"
            );
        }
    }

    #[test]
    fn leaky_relu_and_derivative() {
        let a_src = array![[-1.0, 0.1, 3.2], [-0.1, 0.5, 0.0]];
        assert_eq!(
            leaky_relu(&a_src),
            array![[-LEAKY_ALPHA, 0.1, 3.2], [-0.1 * LEAKY_ALPHA, 0.5, 0.0]]
        );
        assert_eq!(
            leaky_relu_deriv(&a_src),
            array![[LEAKY_ALPHA, 1.0, 1.0], [LEAKY_ALPHA, 1.0, 1.0]]
        );
    }

    #[test]
    fn causal_mask_sets_upper_triangle() {
        let a_src = array![[-1.0, 0.1, 3.2], [-0.1, 0.5, 0.0], [0.8, 0.3, -2.0]];
        let d_inf = f64::NEG_INFINITY;
        assert_eq!(
            causal_mask(&a_src),
            array![[-1.0, d_inf, d_inf], [-0.1, 0.5, d_inf], [0.8, 0.3, -2.0]]
        );
    }

    #[test]
    fn softmax_known_values() {
        let a_src = array![[-1.0, 0.1, 3.2], [-0.1, 0.5, 0.0]];
        let a_want = array![
            [0.014146, 0.042497, 0.943356],
            [0.254629, 0.463963, 0.281408]
        ];
        assert_close(&softmax_rows(&a_src), &a_want, 1e-6);
    }

    #[test]
    fn softmax_large_logits_saturate() {
        assert_close(&softmax_rows(&array![[800.0, 1300.0]]), &array![[0.0, 1.0]], 1e-6);
        let a_out = softmax_rows(&array![[0.0, 1000.0]]);
        assert_eq!(a_out[[0, 0]], 0.0);
        assert_eq!(a_out[[0, 1]], 1.0);
    }

    #[test]
    fn sgd_step_known_values() {
        let mut a_param = array![[18.3, -4.9, 3.2], [-2.1, 0.0, 7.4]];
        let a_grad = array![[16.1, 5.3, -2.0], [-0.1, -0.8, 3.0]];
        sgd_step(&mut a_param, &a_grad, 0.1).unwrap();
        assert_close(
            &a_param,
            &array![[16.69, -5.43, 3.4], [-2.09, 0.08, 7.1]],
            1e-12,
        );
    }

    #[test]
    fn sgd_step_on_row_slice() {
        let mut a_param = Array2::<f64>::ones((3, 2));
        sgd_step(&mut a_param.slice_mut(s![..2, ..]), &Array2::ones((2, 2)), 0.5).unwrap();
        assert_eq!(a_param, array![[0.5, 0.5], [0.5, 0.5], [1.0, 1.0]]);
    }

    #[test]
    fn sgd_step_rejects_shape_mismatch() {
        let mut a_param = Array2::<f64>::zeros((2, 2));
        let res = sgd_step(&mut a_param, &Array2::zeros((2, 3)), 0.1);
        assert!(matches!(res, Err(LlmError::DimensionMismatch { .. })));
    }

    #[test]
    fn row_sums_and_sub_per_row() {
        let a_src = array![[0.1, 0.5, -0.1], [1.0, 0.1, -0.2]];
        let v_sums = row_sums(&a_src);
        assert!((v_sums[0] - 0.5).abs() < 1e-12);
        assert!((v_sums[1] - 0.9).abs() < 1e-12);

        let a_src = array![[5.0, 7.0, 1.0], [2.0, -1.0, 3.0]];
        let a_out = sub_per_row(&a_src, &Array1::from(vec![3.0, -2.0])).unwrap();
        assert_eq!(a_out, array![[2.0, 4.0, -2.0], [4.0, 1.0, 5.0]]);
        assert!(sub_per_row(&a_src, &Array1::from(vec![1.0])).is_err());
    }

    #[test]
    fn matmul_checks_inner_dimension() {
        let a_lhs = array![[1.0, 2.0], [3.0, 4.0]];
        let a_rhs = array![[1.0], [1.0]];
        assert_eq!(matmul(&a_lhs, &a_rhs).unwrap(), array![[3.0], [7.0]]);
        assert_eq!(matmul(&a_lhs.t(), &a_rhs).unwrap(), array![[4.0], [6.0]]);
        assert!(matmul(&a_rhs, &a_rhs).is_err());
    }

    #[test]
    fn concat_passes_empty_operand_through() {
        let a_empty = Array2::<f64>::zeros((0, 0));
        let a_x = array![[1.0, 2.0], [3.0, 4.0]];
        assert_eq!(concat(&a_empty, &a_x).unwrap(), a_x);
        assert_eq!(concat(&a_x, &a_empty).unwrap(), a_x);
        assert_eq!(
            concat(&a_x, &array![[5.0], [6.0]]).unwrap(),
            array![[1.0, 2.0, 5.0], [3.0, 4.0, 6.0]]
        );
    }

    #[test]
    fn concat_rejects_row_mismatch() {
        let res = concat(&array![[1.0, 2.0]], &array![[1.0], [2.0]]);
        assert!(matches!(res, Err(LlmError::DimensionMismatch { op: "concat", .. })));
    }

    #[test]
    fn split_rejects_indivisible_columns() {
        let a_x = Array2::<f64>::zeros((2, 5));
        assert!(split(&a_x, 2).is_err());
        assert!(split(&a_x, 0).is_err());
        assert!(split(&Array2::zeros((0, 0)), 3).unwrap().is_empty());
    }

    #[test]
    fn dropout_mask_edge_probabilities() {
        assert!(dropout_mask(4, 5, 0.0).iter().all(|&d| d == 1.0));
        assert!(dropout_mask(4, 5, 1.0).iter().all(|&d| d == 0.0));
        assert!(dropout_mask(4, 5, -3.0).iter().all(|&d| d == 1.0));
        assert!(dropout_mask(4, 5, 7.0).iter().all(|&d| d == 0.0));
    }

    #[test]
    fn xavier_stays_in_bounds_and_he_has_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let a_x = xavier(10, 6, &mut rng).unwrap();
        let d_limit = 6.0_f64.sqrt() / 16.0_f64.sqrt();
        assert_eq!(a_x.dim(), (10, 6));
        assert!(a_x.iter().all(|d| d.abs() <= d_limit));

        let a_h = he(8, 3, &mut rng).unwrap();
        assert_eq!(a_h.dim(), (8, 3));
        assert!(a_h.iter().all(|d| d.is_finite()));
        assert_eq!(he(0, 3, &mut rng).unwrap().dim(), (0, 3));
    }

    #[test]
    fn one_hot_and_cross_entropy() {
        let a_target = one_hot(&[2, 0], 3).unwrap();
        assert_eq!(a_target, array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]);
        assert!(one_hot(&[3], 3).is_err());

        let a_pred = array![[0.2, 0.3, 0.5], [0.0, 0.5, 0.5]];
        let d_loss = cross_entropy(&a_pred, &a_target).unwrap();
        let d_want = -(0.5_f64.ln() + LOG_CLAMP.ln()) / 2.0;
        assert!((d_loss - d_want).abs() < 1e-12);
    }

    #[test]
    fn argmax_rows_picks_first_maximum() {
        assert_eq!(argmax_rows(&array![[0.1, 0.7, 0.2], [0.5, 0.5, 0.0]]), vec![1, 0]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    prop_compose! {
        fn arb_matrix(max_rows: usize, max_cols: usize)(
            i_rows in 1..=max_rows,
            i_cols in 1..=max_cols,
        )(
            v_data in prop::collection::vec(-50.0f64..50.0, i_rows * i_cols),
            i_rows in Just(i_rows),
            i_cols in Just(i_cols),
        ) -> Array2<f64> {
            Array2::from_shape_vec((i_rows, i_cols), v_data).unwrap()
        }
    }

    proptest! {
        /// Invariant: every softmax row sums to one and has no negative entry.
        #[test]
        fn softmax_rows_are_distributions(a_x in arb_matrix(6, 8)) {
            let a_out = softmax_rows(&a_x);
            for a_row in a_out.rows() {
                prop_assert!((a_row.sum() - 1.0).abs() < 1e-9);
                prop_assert!(a_row.iter().all(|&d| (0.0..=1.0).contains(&d)));
            }
        }

        /// Invariant: masked positions carry no probability mass.
        #[test]
        fn masked_softmax_has_no_future_mass(i_n in 1usize..8, d_seed in -5.0f64..5.0) {
            let a_x = Array2::from_shape_fn((i_n, i_n), |(i, j)| d_seed * (i as f64 + 1.0) - j as f64);
            let a_out = softmax_rows(&causal_mask(&a_x));
            for ((i, j), &d) in a_out.indexed_iter() {
                if j > i {
                    prop_assert!(d.abs() < 1e-12);
                }
            }
        }

        /// Invariant: split undoes concat part by part.
        #[test]
        fn concat_then_split_recovers_parts(
            i_rows in 1usize..5,
            i_width in 1usize..5,
            i_parts in 1usize..5,
        ) {
            let v_parts: Vec<Array2<f64>> = (0..i_parts)
                .map(|i_p| Array2::from_shape_fn((i_rows, i_width), |(i, j)| (i_p * 100 + i * 10 + j) as f64))
                .collect();
            let a_joined = concat_all(&v_parts).unwrap();
            prop_assert_eq!(a_joined.dim(), (i_rows, i_width * i_parts));
            let v_back = split(&a_joined, i_parts).unwrap();
            prop_assert_eq!(v_back, v_parts);
        }

        /// Invariant: dropout entries are exactly 0 or exactly 1/(1-p).
        #[test]
        fn dropout_entries_are_zero_or_scaled(d_p in 0.0f64..0.99) {
            let d_scale = 1.0 / (1.0 - d_p);
            let a_mask = dropout_mask(6, 7, d_p);
            prop_assert!(a_mask.iter().all(|&d| d == 0.0 || d == d_scale));
        }
    }
}
