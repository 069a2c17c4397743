use std::ops::Mul;

use crate::linalg::{
    add3, det33, identity33, mat3_mul_vec3, matmul33, nearest_rotation, scale3, transpose33,
};
use crate::scalar::Scalar;

/// Error types for the transforms module.
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum TransformError {
    /// The matrix contains NaN or infinite entries.
    #[error("Transformation contains non-finite values")]
    NonFinite,

    /// The bottom row of a homogeneous matrix is not `[0, 0, 0, 1]`.
    #[error("Transformation is not homogeneous: bottom row must be [0, 0, 0, 1]")]
    NotHomogeneous,

    /// A rotation axis of zero length was given.
    #[error("Cannot compute rotation matrix from a zero vector")]
    ZeroAxis,
}

/// Compute the rotation matrix from an axis and angle.
///
/// # Arguments
///
/// * `axis` - The axis of rotation. It does not need to be normalized.
/// * `angle` - The angle of rotation in radians.
///
/// # Returns
///
/// The rotation matrix.
///
/// Example:
///
/// ```
/// use kornia_3d::transforms::axis_angle_to_rotation_matrix;
///
/// let axis = [1.0, 0.0, 0.0];
/// let angle = std::f64::consts::PI / 2.0;
/// let rotation = axis_angle_to_rotation_matrix(&axis, angle).unwrap();
/// assert!((rotation[1][2] + 1.0).abs() < 1e-12);
/// ```
pub fn axis_angle_to_rotation_matrix<T: Scalar>(
    axis: &[T; 3],
    angle: T,
) -> Result<[[T; 3]; 3], TransformError> {
    // normalize the vector
    let axis_norm = {
        let magnitude = (axis[0].powi(2) + axis[1].powi(2) + axis[2].powi(2)).sqrt();
        match magnitude < T::cast_f64(1e-10) {
            true => return Err(TransformError::ZeroAxis),
            false => scale3(axis, T::one() / magnitude),
        }
    };

    let x = axis_norm[0];
    let y = axis_norm[1];
    let z = axis_norm[2];

    let c = angle.cos();
    let s = angle.sin();
    let t = T::one() - c;

    let m00 = c + x * x * t;
    let m11 = c + y * y * t;
    let m22 = c + z * z * t;

    let tmp1 = x * y * t;
    let tmp2 = z * s;

    let m10 = tmp1 + tmp2;
    let m01 = tmp1 - tmp2;

    let tmp3 = x * z * t;
    let tmp4 = y * s;

    let m20 = tmp3 - tmp4;
    let m02 = tmp3 + tmp4;

    let tmp5 = y * z * t;
    let tmp6 = x * s;

    let m12 = tmp5 - tmp6;
    let m21 = tmp5 + tmp6;

    Ok([[m00, m01, m02], [m10, m11, m12], [m20, m21, m22]])
}

/// Rotation about the X axis.
pub fn rotation_x<T: Scalar>(angle: T) -> [[T; 3]; 3] {
    let (s, c) = angle.sin_cos();
    let (o, z) = (T::one(), T::zero());
    [[o, z, z], [z, c, -s], [z, s, c]]
}

/// Rotation about the Y axis.
pub fn rotation_y<T: Scalar>(angle: T) -> [[T; 3]; 3] {
    let (s, c) = angle.sin_cos();
    let (o, z) = (T::one(), T::zero());
    [[c, z, s], [z, o, z], [-s, z, c]]
}

/// Rotation about the Z axis.
pub fn rotation_z<T: Scalar>(angle: T) -> [[T; 3]; 3] {
    let (s, c) = angle.sin_cos();
    let (o, z) = (T::one(), T::zero());
    [[c, -s, z], [s, c, z], [z, z, o]]
}

/// Rotation from intrinsic XYZ Euler angles, `Rx(angles[0]) * Ry(angles[1]) * Rz(angles[2])`.
pub fn rotation_from_xyz<T: Scalar>(angles: &[T; 3]) -> [[T; 3]; 3] {
    matmul33(
        &rotation_x(angles[0]),
        &matmul33(&rotation_y(angles[1]), &rotation_z(angles[2])),
    )
}

/// Rotation from extrinsic XYZ angles, `Rz(angles[2]) * Ry(angles[1]) * Rx(angles[0])`.
///
/// For small angles this is the exponential map of the twist `angles` up to second order.
pub fn rotation_from_zyx<T: Scalar>(angles: &[T; 3]) -> [[T; 3]; 3] {
    matmul33(
        &rotation_z(angles[2]),
        &matmul33(&rotation_y(angles[1]), &rotation_x(angles[0])),
    )
}

/// Angle in radians of a rotation matrix, in `[0, pi]`.
pub fn rotation_angle<T: Scalar>(rotation: &[[T; 3]; 3]) -> T {
    let trace = rotation[0][0] + rotation[1][1] + rotation[2][2];
    let cos = (trace - T::one()) / T::cast_f64(2.0);
    cos.max(-T::one()).min(T::one()).acos()
}

/// A rigid transformation in 3D: a rotation followed by a translation.
///
/// Maps a point `p` to `rotation * p + translation`. Equivalent to the homogeneous matrix
/// `[[R, t], [0, 1]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform<T = f64> {
    /// The rotation block, row major.
    pub rotation: [[T; 3]; 3],
    /// The translation vector.
    pub translation: [T; 3],
}

impl<T: Scalar> Default for Transform<T> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<T: Scalar> Transform<T> {
    /// The identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: identity33(),
            translation: [T::zero(); 3],
        }
    }

    /// Create a transformation from a rotation matrix and a translation vector.
    pub fn new(rotation: [[T; 3]; 3], translation: [T; 3]) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create a transformation from a 4x4 homogeneous matrix.
    ///
    /// The rotation block is taken as is; use [`Transform::orthonormalized`] to project it onto
    /// a proper rotation.
    pub fn from_matrix(matrix: &[[T; 4]; 4]) -> Result<Self, TransformError> {
        if matrix.iter().flatten().any(|v| !v.is_finite()) {
            return Err(TransformError::NonFinite);
        }

        let expected = [T::zero(), T::zero(), T::zero(), T::one()];
        if matrix[3]
            .iter()
            .zip(expected.iter())
            .any(|(a, b)| (*a - *b).abs() > T::epsilon())
        {
            return Err(TransformError::NotHomogeneous);
        }

        let mut rotation = [[T::zero(); 3]; 3];
        let mut translation = [T::zero(); 3];
        for i in 0..3 {
            rotation[i].copy_from_slice(&matrix[i][..3]);
            translation[i] = matrix[i][3];
        }

        Ok(Self {
            rotation,
            translation,
        })
    }

    /// The 4x4 homogeneous matrix of the transformation.
    pub fn to_matrix(&self) -> [[T; 4]; 4] {
        let mut m = [[T::zero(); 4]; 4];
        for (i, row) in m.iter_mut().enumerate().take(3) {
            row[..3].copy_from_slice(&self.rotation[i]);
            row[3] = self.translation[i];
        }
        m[3][3] = T::one();
        m
    }

    /// Compose two transformations, `self * rhs`: first apply `rhs`, then `self`.
    pub fn compose(&self, rhs: &Self) -> Self {
        Self {
            rotation: matmul33(&self.rotation, &rhs.rotation),
            translation: add3(
                &mat3_mul_vec3(&self.rotation, &rhs.translation),
                &self.translation,
            ),
        }
    }

    /// The inverse transformation.
    pub fn inverse(&self) -> Self {
        let rotation = transpose33(&self.rotation);
        let translation = scale3(&mat3_mul_vec3(&rotation, &self.translation), -T::one());
        Self {
            rotation,
            translation,
        }
    }

    /// Apply the transformation to a point.
    #[inline]
    pub fn transform_point(&self, point: &[T; 3]) -> [T; 3] {
        add3(&mat3_mul_vec3(&self.rotation, point), &self.translation)
    }

    /// Apply only the rotation to a direction vector, e.g. a normal.
    #[inline]
    pub fn rotate_vector(&self, vector: &[T; 3]) -> [T; 3] {
        mat3_mul_vec3(&self.rotation, vector)
    }

    /// Copy of the transformation with its rotation block projected onto SO(3).
    pub fn orthonormalized(&self) -> Self {
        Self {
            rotation: nearest_rotation(&self.rotation),
            translation: self.translation,
        }
    }

    /// Largest absolute entry of `R^T R - I` plus the deviation of `det(R)` from one.
    pub fn orthonormality_error(&self) -> T {
        let rtr = matmul33(&transpose33(&self.rotation), &self.rotation);
        let mut err = (det33(&self.rotation) - T::one()).abs();
        for (i, row) in rtr.iter().enumerate() {
            for (j, val) in row.iter().enumerate() {
                let expected = if i == j { T::one() } else { T::zero() };
                err = err.max((*val - expected).abs());
            }
        }
        err
    }

    /// Whether all the entries are finite.
    pub fn is_finite(&self) -> bool {
        self.rotation.iter().flatten().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite())
    }

    /// Convert to another precision.
    pub fn cast<U: Scalar>(&self) -> Transform<U> {
        Transform {
            rotation: self.rotation.map(|row| row.map(|v| v.cast())),
            translation: self.translation.map(|v| v.cast()),
        }
    }
}

impl<T: Scalar> Mul for Transform<T> {
    type Output = Transform<T>;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_axis_angle_to_rotation_matrix_identity() -> Result<(), Box<dyn std::error::Error>> {
        let axis = [1.0, 0.0, 0.0];
        let angle = std::f64::consts::PI / 2.0;
        let rotation = axis_angle_to_rotation_matrix(&axis, angle)?;
        let expected = [[1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]];
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(rotation[i][j], expected[i][j], epsilon = 1e-12);
            }
        }
        Ok(())
    }

    #[test]
    fn test_axis_angle_zero_axis() {
        let res = axis_angle_to_rotation_matrix(&[0.0f32; 3], 1.0);
        assert_eq!(res, Err(TransformError::ZeroAxis));
    }

    #[test]
    fn test_axis_rotations_match_axis_angle() -> Result<(), Box<dyn std::error::Error>> {
        let angle = 0.7;
        let pairs = [
            (rotation_x(angle), [1.0, 0.0, 0.0]),
            (rotation_y(angle), [0.0, 1.0, 0.0]),
            (rotation_z(angle), [0.0, 0.0, 1.0]),
        ];
        for (rot, axis) in pairs {
            let expected = axis_angle_to_rotation_matrix(&axis, angle)?;
            for i in 0..3 {
                for j in 0..3 {
                    assert_relative_eq!(rot[i][j], expected[i][j], epsilon = 1e-12);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_euler_orders() {
        let angles = [0.1, -0.2, 0.3];
        let xyz = rotation_from_xyz(&angles);
        let zyx = rotation_from_zyx(&angles);
        // both agree to first order in the angles
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(xyz[i][j], zyx[i][j], epsilon = 0.1);
            }
        }
        let expected = matmul33(&rotation_z(0.3), &matmul33(&rotation_y(-0.2), &rotation_x(0.1)));
        assert_eq!(zyx, expected);
        assert_relative_eq!(det33(&xyz), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_angle() {
        assert_relative_eq!(rotation_angle(&rotation_z(0.25f64)), 0.25, epsilon = 1e-12);
        assert_relative_eq!(rotation_angle(&identity33::<f64>()), 0.0);
    }

    #[test]
    fn test_transform_compose_inverse() -> Result<(), Box<dyn std::error::Error>> {
        let a = Transform::new(
            axis_angle_to_rotation_matrix(&[1.0, 2.0, 3.0], 0.4)?,
            [0.5, -1.0, 2.0],
        );
        let b = Transform::new(rotation_y(-0.3), [0.1, 0.2, 0.3]);

        let p = [0.3, -0.7, 1.1];
        let ab = a * b;
        let expected = a.transform_point(&b.transform_point(&p));
        let got = ab.transform_point(&p);
        for i in 0..3 {
            assert_relative_eq!(got[i], expected[i], epsilon = 1e-12);
        }

        let id = a.compose(&a.inverse());
        let eye = Transform::<f64>::identity();
        for i in 0..3 {
            assert_relative_eq!(id.translation[i], 0.0, epsilon = 1e-12);
            for j in 0..3 {
                assert_relative_eq!(id.rotation[i][j], eye.rotation[i][j], epsilon = 1e-12);
            }
        }
        Ok(())
    }

    #[test]
    fn test_transform_matrix_conversion() -> Result<(), Box<dyn std::error::Error>> {
        let t = Transform::new(rotation_x(0.2), [1.0, 2.0, 3.0]);
        let m = t.to_matrix();
        assert_eq!(m[3], [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(Transform::from_matrix(&m)?, t);

        let mut bad = m;
        bad[3][0] = 0.5;
        assert_eq!(
            Transform::from_matrix(&bad),
            Err(TransformError::NotHomogeneous)
        );

        let mut nan = m;
        nan[1][3] = f64::NAN;
        assert_eq!(Transform::from_matrix(&nan), Err(TransformError::NonFinite));
        Ok(())
    }

    #[test]
    fn test_orthonormalized() {
        let mut t = Transform::new(rotation_z(1.0f64), [0.0, 0.0, 1.0]);
        t.rotation[0][1] += 1e-3;
        assert!(t.orthonormality_error() > 1e-4);

        let fixed = t.orthonormalized();
        assert!(fixed.orthonormality_error() < 1e-12);
        assert_eq!(fixed.translation, t.translation);
    }

    #[test]
    fn test_cast_precision() {
        let t = Transform::new(rotation_z(0.5f64), [1.0, 2.0, 3.0]);
        let t32: Transform<f32> = t.cast();
        assert_relative_eq!(t32.rotation[0][0], 0.5f32.cos(), epsilon = 1e-6);
        assert_eq!(t32.translation, [1.0f32, 2.0, 3.0]);
    }
}
