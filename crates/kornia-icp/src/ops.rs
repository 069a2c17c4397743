use faer::prelude::SpSolver;

/// Solve the symmetric positive definite 6x6 system `a * x = b` with the Cholesky decomposition
/// of faer.
///
/// Only the lower triangle of `a` is read. Returns `None` if `a` is not numerically positive
/// definite: a column whose squared pivot `l_jj^2` is not larger than `rel_tol * a_jj` is
/// (almost) a combination of the previous ones. The test is per column, so it does not depend on
/// the units of the unknowns.
pub(crate) fn solve_cholesky6(a: &[[f64; 6]; 6], b: &[f64; 6], rel_tol: f64) -> Option<[f64; 6]> {
    if a.iter().flatten().chain(b.iter()).any(|v| !v.is_finite()) {
        return None;
    }
    let max_diag = (0..6).fold(0.0f64, |acc, i| acc.max(a[i][i]));
    if !(max_diag > 0.0) {
        return None;
    }

    let mat_a = faer::Mat::<f64>::from_fn(6, 6, |i, j| if i >= j { a[i][j] } else { a[j][i] });
    let llt = mat_a.cholesky(faer::Side::Lower).ok()?;

    let mat_l = llt.compute_l();
    for j in 0..6 {
        let a_jj = a[j][j];
        let l_jj = mat_l.read(j, j);
        // also rejects NaN
        if !(a_jj > f64::EPSILON * max_diag && l_jj * l_jj > rel_tol * a_jj) {
            return None;
        }
    }

    let mat_b = faer::Mat::<f64>::from_fn(6, 1, |i, _| b[i]);
    let mat_x = llt.solve(&mat_b);

    let x: [f64; 6] = std::array::from_fn(|i| mat_x.read(i, 0));
    x.iter().all(|v| v.is_finite()).then_some(x)
}
