//! Dense matrix operations behind the worker's `matrix` request
//!
//! [`MatrixOperations`] is the capability the worker is handed;
//! [`DenseMatrixOps`] is the built-in row-major implementation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pivots smaller than this are treated as zero
const SINGULAR_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatrixError {
    #[error("Matrix dimensions do not match: {0}")]
    DimensionMismatch(String),
    #[error("Matrix is singular")]
    Singular,
    #[error("Matrix must be square")]
    NotSquare,
    #[error("Rows have inconsistent lengths")]
    Ragged,
    #[error("{operation} expects {expected} matrices, got {got}")]
    Operands {
        operation: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Missing constants vector for solve")]
    MissingConstants,
}

pub type MatrixResult<T> = Result<T, MatrixError>;

/// Row-major matrix as it crosses the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<Vec<f64>>,
}

impl Matrix {
    /// Build from rows, checking they all have the same length
    pub fn from_rows(data: Vec<Vec<f64>>) -> MatrixResult<Matrix> {
        let cols = data.first().map_or(0, Vec::len);
        if data.iter().any(|row| row.len() != cols) {
            return Err(MatrixError::Ragged);
        }
        Ok(Matrix {
            rows: data.len(),
            cols,
            data,
        })
    }

    pub fn identity(n: usize) -> Matrix {
        let data = (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        Matrix {
            rows: n,
            cols: n,
            data,
        }
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    /// Declared shape agrees with the data
    fn check_shape(&self) -> MatrixResult<()> {
        if self.data.len() != self.rows || self.data.iter().any(|row| row.len() != self.cols) {
            return Err(MatrixError::Ragged);
        }
        Ok(())
    }
}

/// Matrix capability handed to the worker
pub trait MatrixOperations {
    fn multiply(&self, a: &Matrix, b: &Matrix) -> MatrixResult<Matrix>;
    fn add(&self, a: &Matrix, b: &Matrix) -> MatrixResult<Matrix>;
    fn subtract(&self, a: &Matrix, b: &Matrix) -> MatrixResult<Matrix>;
    fn inverse(&self, m: &Matrix) -> MatrixResult<Matrix>;
    fn determinant(&self, m: &Matrix) -> MatrixResult<f64>;
    fn solve(&self, a: &Matrix, b: &[f64]) -> MatrixResult<Vec<f64>>;
}

/// Straightforward dense implementation (Gaussian elimination, partial pivoting)
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseMatrixOps;

impl DenseMatrixOps {
    pub fn new() -> Self {
        DenseMatrixOps
    }

    fn elementwise(a: &Matrix, b: &Matrix, f: impl Fn(f64, f64) -> f64) -> MatrixResult<Matrix> {
        a.check_shape()?;
        b.check_shape()?;
        if a.rows != b.rows || a.cols != b.cols {
            return Err(MatrixError::DimensionMismatch(format!(
                "{}x{} and {}x{}",
                a.rows, a.cols, b.rows, b.cols
            )));
        }
        let data = a
            .data
            .iter()
            .zip(&b.data)
            .map(|(ra, rb)| ra.iter().zip(rb).map(|(x, y)| f(*x, *y)).collect())
            .collect();
        Ok(Matrix {
            rows: a.rows,
            cols: a.cols,
            data,
        })
    }

    /// Index of the largest |value| in `col` at or below `from`
    fn pivot_row(data: &[Vec<f64>], col: usize, from: usize) -> usize {
        (from..data.len())
            .max_by(|&i, &j| data[i][col].abs().total_cmp(&data[j][col].abs()))
            .unwrap_or(from)
    }
}

impl MatrixOperations for DenseMatrixOps {
    fn multiply(&self, a: &Matrix, b: &Matrix) -> MatrixResult<Matrix> {
        a.check_shape()?;
        b.check_shape()?;
        if a.cols != b.rows {
            return Err(MatrixError::DimensionMismatch(format!(
                "{}x{} times {}x{}",
                a.rows, a.cols, b.rows, b.cols
            )));
        }
        let data = (0..a.rows)
            .map(|i| {
                (0..b.cols)
                    .map(|j| (0..a.cols).map(|k| a.data[i][k] * b.data[k][j]).sum())
                    .collect()
            })
            .collect();
        Ok(Matrix {
            rows: a.rows,
            cols: b.cols,
            data,
        })
    }

    fn add(&self, a: &Matrix, b: &Matrix) -> MatrixResult<Matrix> {
        Self::elementwise(a, b, |x, y| x + y)
    }

    fn subtract(&self, a: &Matrix, b: &Matrix) -> MatrixResult<Matrix> {
        Self::elementwise(a, b, |x, y| x - y)
    }

    fn determinant(&self, m: &Matrix) -> MatrixResult<f64> {
        m.check_shape()?;
        if !m.is_square() {
            return Err(MatrixError::NotSquare);
        }
        let mut data = m.data.clone();
        let n = m.rows;
        let mut det = 1.0;

        for col in 0..n {
            let pivot = Self::pivot_row(&data, col, col);
            if data[pivot][col].abs() < SINGULAR_EPSILON {
                return Ok(0.0);
            }
            if pivot != col {
                data.swap(pivot, col);
                det = -det;
            }
            det *= data[col][col];
            for row in col + 1..n {
                let factor = data[row][col] / data[col][col];
                for k in col..n {
                    data[row][k] -= factor * data[col][k];
                }
            }
        }
        Ok(det)
    }

    fn inverse(&self, m: &Matrix) -> MatrixResult<Matrix> {
        m.check_shape()?;
        if !m.is_square() {
            return Err(MatrixError::NotSquare);
        }
        let n = m.rows;
        // Gauss-Jordan on [m | I]
        let mut aug: Vec<Vec<f64>> = m
            .data
            .iter()
            .zip(Matrix::identity(n).data)
            .map(|(row, id)| row.iter().copied().chain(id).collect())
            .collect();

        for col in 0..n {
            let pivot = Self::pivot_row(&aug, col, col);
            if aug[pivot][col].abs() < SINGULAR_EPSILON {
                return Err(MatrixError::Singular);
            }
            aug.swap(pivot, col);

            let p = aug[col][col];
            for value in aug[col].iter_mut() {
                *value /= p;
            }
            for row in 0..n {
                if row == col {
                    continue;
                }
                let factor = aug[row][col];
                if factor == 0.0 {
                    continue;
                }
                for k in 0..2 * n {
                    aug[row][k] -= factor * aug[col][k];
                }
            }
        }

        let data = aug.into_iter().map(|row| row[n..].to_vec()).collect();
        Ok(Matrix {
            rows: n,
            cols: n,
            data,
        })
    }

    fn solve(&self, a: &Matrix, b: &[f64]) -> MatrixResult<Vec<f64>> {
        a.check_shape()?;
        if !a.is_square() {
            return Err(MatrixError::NotSquare);
        }
        if b.len() != a.rows {
            return Err(MatrixError::DimensionMismatch(format!(
                "{}x{} system with {} constants",
                a.rows,
                a.cols,
                b.len()
            )));
        }
        let n = a.rows;
        let mut aug: Vec<Vec<f64>> = a
            .data
            .iter()
            .zip(b)
            .map(|(row, c)| row.iter().copied().chain(std::iter::once(*c)).collect())
            .collect();

        for col in 0..n {
            let pivot = Self::pivot_row(&aug, col, col);
            if aug[pivot][col].abs() < SINGULAR_EPSILON {
                return Err(MatrixError::Singular);
            }
            aug.swap(pivot, col);
            for row in col + 1..n {
                let factor = aug[row][col] / aug[col][col];
                for k in col..=n {
                    aug[row][k] -= factor * aug[col][k];
                }
            }
        }

        // Back substitution
        let mut x = vec![0.0; n];
        for row in (0..n).rev() {
            let tail: f64 = (row + 1..n).map(|k| aug[row][k] * x[k]).sum();
            x[row] = (aug[row][n] - tail) / aug[row][row];
        }
        Ok(x)
    }
}
