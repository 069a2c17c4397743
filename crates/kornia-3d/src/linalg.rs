use crate::scalar::Scalar;

/// Transform a set of points using a rotation and translation.
///
/// # Arguments
///
/// * `src_points` - A set of points to be transformed.
/// * `dst_r_src` - A rotation matrix.
/// * `dst_t_src` - A translation vector.
/// * `dst_points` - A pre-allocated vector to store the transformed points.
///
/// PRECONDITION: dst_points is a pre-allocated vector of the same size as source.
///
/// Example:
///
/// ```
/// use kornia_3d::linalg::transform_points;
///
/// let src_points = vec![[2.0, 2.0, 2.0], [3.0, 4.0, 5.0]];
/// let rotation = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
/// let translation = [0.0, 0.0, 0.0];
/// let mut dst_points = vec![[0.0; 3]; src_points.len()];
/// transform_points(&src_points, &rotation, &translation, &mut dst_points);
/// assert_eq!(dst_points, src_points);
/// ```
pub fn transform_points<T: Scalar>(
    src_points: &[[T; 3]],
    dst_r_src: &[[T; 3]; 3],
    dst_t_src: &[T; 3],
    dst_points: &mut [[T; 3]],
) {
    assert_eq!(src_points.len(), dst_points.len());

    for (point_dst, point_src) in dst_points.iter_mut().zip(src_points.iter()) {
        *point_dst = add3(&mat3_mul_vec3(dst_r_src, point_src), dst_t_src);
    }
}

/// The 3x3 identity matrix.
#[inline]
pub fn identity33<T: Scalar>() -> [[T; 3]; 3] {
    let (o, z) = (T::one(), T::zero());
    [[o, z, z], [z, o, z], [z, z, o]]
}

/// Dot product of two 3-vectors.
#[inline]
pub fn dot_product3<T: Scalar>(a: &[T; 3], b: &[T; 3]) -> T {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Cross product of two 3-vectors.
#[inline]
pub fn cross_product3<T: Scalar>(a: &[T; 3], b: &[T; 3]) -> [T; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Element-wise sum of two 3-vectors.
#[inline]
pub fn add3<T: Scalar>(a: &[T; 3], b: &[T; 3]) -> [T; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// Element-wise difference `a - b` of two 3-vectors.
#[inline]
pub fn sub3<T: Scalar>(a: &[T; 3], b: &[T; 3]) -> [T; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Multiply a 3-vector by a scalar.
#[inline]
pub fn scale3<T: Scalar>(a: &[T; 3], s: T) -> [T; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

/// Euclidean norm of a 3-vector.
#[inline]
pub fn norm3<T: Scalar>(a: &[T; 3]) -> T {
    dot_product3(a, a).sqrt()
}

/// Multiply a 3x3 matrix by a 3-vector.
#[inline]
pub fn mat3_mul_vec3<T: Scalar>(m: &[[T; 3]; 3], v: &[T; 3]) -> [T; 3] {
    [
        dot_product3(&m[0], v),
        dot_product3(&m[1], v),
        dot_product3(&m[2], v),
    ]
}

/// Multiply two 3x3 matrices.
pub fn matmul33<T: Scalar>(a: &[[T; 3]; 3], b: &[[T; 3]; 3]) -> [[T; 3]; 3] {
    let mut m = [[T::zero(); 3]; 3];
    for (i, row) in m.iter_mut().enumerate() {
        for (j, val) in row.iter_mut().enumerate() {
            *val = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    m
}

/// Transpose of a 3x3 matrix.
#[inline]
pub fn transpose33<T: Scalar>(m: &[[T; 3]; 3]) -> [[T; 3]; 3] {
    [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ]
}

/// Determinant of a 3x3 matrix.
#[inline]
pub fn det33<T: Scalar>(m: &[[T; 3]; 3]) -> T {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Singular value decomposition `A = U * diag(s) * V^T` of a 3x3 matrix.
#[derive(Debug, Clone, Copy)]
pub struct Svd3<T> {
    /// Left singular vectors, stored as columns. Always a proper rotation.
    pub u: [[T; 3]; 3],
    /// Singular values in descending order.
    pub s: [T; 3],
    /// Right singular vectors, stored as columns.
    pub v: [[T; 3]; 3],
}

/// Compute the singular value decomposition of a 3x3 matrix.
///
/// The decomposition runs in `f64` with faer and is cast back to `T`. `U` is always a proper
/// rotation: when faer returns a reflection, the last columns of `U` and `V` are both negated,
/// which keeps `U * diag(s) * V^T` and the non-negative singular values unchanged.
pub fn svd3<T: Scalar>(a: &[[T; 3]; 3]) -> Svd3<T> {
    let mat = faer::Mat::<f64>::from_fn(3, 3, |i, j| a[i][j].into_f64());
    let svd = mat.svd();
    let (mat_u, s_diag, mat_v) = (svd.u(), svd.s_diagonal(), svd.v());

    let mut u = [[0.0f64; 3]; 3];
    let mut v = [[0.0f64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            u[i][j] = mat_u.read(i, j);
            v[i][j] = mat_v.read(i, j);
        }
    }

    if det33(&u) < 0.0 {
        for i in 0..3 {
            u[i][2] = -u[i][2];
            v[i][2] = -v[i][2];
        }
    }

    Svd3 {
        u: u.map(|row| row.map(T::cast_f64)),
        s: [s_diag.read(0), s_diag.read(1), s_diag.read(2)].map(T::cast_f64),
        v: v.map(|row| row.map(T::cast_f64)),
    }
}

/// Project a 3x3 matrix onto the closest rotation matrix in the Frobenius sense.
///
/// Computes `U * diag(1, 1, det(U V^T)) * V^T` from the SVD of `m`.
pub fn nearest_rotation<T: Scalar>(m: &[[T; 3]; 3]) -> [[T; 3]; 3] {
    let svd = svd3(m);
    let d = det33(&svd.u) * det33(&svd.v);
    let mut u = svd.u;
    if d < T::zero() {
        for row in u.iter_mut() {
            row[2] = -row[2];
        }
    }
    matmul33(&u, &transpose33(&svd.v))
}
