//! Assertion functions for numerical comparisons with tolerance

use nalgebra::{DMatrix, DVector};

/// Compare scalar values with tolerance
pub fn assert_scalar_close(actual: f64, expected: f64, tolerance: f64, field_name: &str) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= tolerance,
        "{}: expected {}, got {} (diff: {}, tolerance: {})",
        field_name,
        expected,
        actual,
        diff,
        tolerance
    );
}

/// Compare DVector with tolerance
pub fn assert_dvector_close(
    actual: &DVector<f64>,
    expected: &DVector<f64>,
    tolerance: f64,
    field_name: &str,
) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "{}: dimension mismatch (actual: {}, expected: {})",
        field_name,
        actual.len(),
        expected.len()
    );

    for i in 0..actual.len() {
        let diff = (actual[i] - expected[i]).abs();
        assert!(
            diff <= tolerance,
            "{}[{}]: expected {}, got {} (diff: {}, tolerance: {})",
            field_name,
            i,
            expected[i],
            actual[i],
            diff,
            tolerance
        );
    }
}

/// Compare DMatrix with tolerance
pub fn assert_dmatrix_close(
    actual: &DMatrix<f64>,
    expected: &DMatrix<f64>,
    tolerance: f64,
    field_name: &str,
) {
    assert_eq!(
        actual.shape(),
        expected.shape(),
        "{}: shape mismatch (actual: {:?}, expected: {:?})",
        field_name,
        actual.shape(),
        expected.shape()
    );

    for i in 0..actual.nrows() {
        for j in 0..actual.ncols() {
            let diff = (actual[(i, j)] - expected[(i, j)]).abs();
            assert!(
                diff <= tolerance,
                "{}[{},{}]: expected {}, got {} (diff: {}, tolerance: {})",
                field_name,
                i,
                j,
                expected[(i, j)],
                actual[(i, j)],
                diff,
                tolerance
            );
        }
    }
}

/// Compare per-timestep vectors with tolerance
pub fn assert_dvectors_close(
    actual: &[DVector<f64>],
    expected: &[DVector<f64>],
    tolerance: f64,
    field_name: &str,
) {
    assert_eq!(actual.len(), expected.len(), "{}: length mismatch", field_name);
    for (t, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert_dvector_close(a, e, tolerance, &format!("{} t={}", field_name, t));
    }
}

/// Compare per-timestep matrices with tolerance
pub fn assert_dmatrices_close(
    actual: &[DMatrix<f64>],
    expected: &[DMatrix<f64>],
    tolerance: f64,
    field_name: &str,
) {
    assert_eq!(actual.len(), expected.len(), "{}: length mismatch", field_name);
    for (t, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert_dmatrix_close(a, e, tolerance, &format!("{} t={}", field_name, t));
    }
}

/// Check that a sequence never decreases beyond a relative tolerance
pub fn assert_non_decreasing(values: &[f64], tolerance: f64, field_name: &str) {
    for (i, pair) in values.windows(2).enumerate() {
        let slack = tolerance * (1.0 + pair[0].abs());
        assert!(
            pair[1] >= pair[0] - slack,
            "{}: decreased at {} from {} to {} (slack: {})",
            field_name,
            i + 1,
            pair[0],
            pair[1],
            slack
        );
    }
}
