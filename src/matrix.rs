//! Dense row-major matrix used for data, codes, statistics and the dictionary.
//!
//! Storage is a flat `Vec<f64>`: entry `(i, j)` lives at `data[i * cols + j]`.
//! The kernels here are the handful the factorization engine needs and are
//! written for row-major access: products against transposes walk rows of
//! both operands, and updates that only touch a feature subset go through
//! [`Matrix::gather_columns`] / [`Matrix::scatter_columns`] into a compact
//! block so the hot loops stay contiguous.

use std::ops::{Index, IndexMut};

use crate::error::{DictFactError, Result};

/// A dense `rows × cols` matrix of `f64`.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Create a zero matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0.0)
    }

    /// Create a matrix with every entry set to `value`.
    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Wrap flat row-major data.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(DictFactError::DimensionMismatch {
                expected: rows * cols,
                got: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from a slice of equally sized rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let first = rows
            .first()
            .ok_or_else(|| DictFactError::EmptyInput("no rows given".into()))?;
        let cols = first.len();
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(DictFactError::DimensionMismatch {
                    expected: cols,
                    got: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    // --- Accessors ---

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw row-major data.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    // --- Row and column selection ---

    /// Copy the given rows, in order, into a new matrix.
    pub fn select_rows(&self, ids: &[usize]) -> Matrix {
        let mut out = Matrix::zeros(ids.len(), self.cols);
        for (dst, &src) in ids.iter().enumerate() {
            out.row_mut(dst).copy_from_slice(self.row(src));
        }
        out
    }

    /// Copy the contiguous row range `start..end` into a new matrix.
    pub fn slice_rows(&self, start: usize, end: usize) -> Matrix {
        Matrix {
            rows: end - start,
            cols: self.cols,
            data: self.data[start * self.cols..end * self.cols].to_vec(),
        }
    }

    /// Write the rows of `src` back at positions `ids`.
    pub fn scatter_rows(&mut self, ids: &[usize], src: &Matrix) {
        debug_assert_eq!(ids.len(), src.rows);
        debug_assert_eq!(self.cols, src.cols);
        for (i, &dst) in ids.iter().enumerate() {
            self.row_mut(dst).copy_from_slice(src.row(i));
        }
    }

    /// Gather columns `subset` into `out`, which is resized to `rows × subset.len()`.
    pub fn gather_columns(&self, subset: &[usize], out: &mut Matrix) {
        out.rows = self.rows;
        out.cols = subset.len();
        out.data.clear();
        out.data.reserve(self.rows * subset.len());
        for i in 0..self.rows {
            let row = self.row(i);
            out.data.extend(subset.iter().map(|&j| row[j]));
        }
    }

    /// Write the columns of `src` back at column positions `subset`.
    pub fn scatter_columns(&mut self, subset: &[usize], src: &Matrix) {
        debug_assert_eq!(src.rows, self.rows);
        debug_assert_eq!(src.cols, subset.len());
        for i in 0..self.rows {
            let src_row = src.row(i);
            let dst_row = self.row_mut(i);
            for (jj, &j) in subset.iter().enumerate() {
                dst_row[j] = src_row[jj];
            }
        }
    }

    // --- Products ---

    /// `self · otherᵗ`, shape `self.rows × other.rows`.
    pub fn mul_transpose(&self, other: &Matrix) -> Matrix {
        debug_assert_eq!(self.cols, other.cols);
        let mut out = Matrix::zeros(self.rows, other.rows);
        for i in 0..self.rows {
            let a = self.row(i);
            let out_row = out.row_mut(i);
            for (j, o) in out_row.iter_mut().enumerate() {
                *o = dot(a, other.row(j));
            }
        }
        out
    }

    /// Symmetric `self · selfᵗ`.
    pub fn gram(&self) -> Matrix {
        let mut out = Matrix::zeros(self.rows, self.rows);
        self.add_gram_to(&mut out, 1.0);
        out
    }

    /// `out += alpha · self · selfᵗ`, computing the upper triangle once.
    pub fn add_gram_to(&self, out: &mut Matrix, alpha: f64) {
        debug_assert_eq!(out.shape(), (self.rows, self.rows));
        for i in 0..self.rows {
            for j in i..self.rows {
                let v = alpha * dot(self.row(i), self.row(j));
                out[(i, j)] += v;
                if i != j {
                    out[(j, i)] += v;
                }
            }
        }
    }

    /// `selfᵗ · other`, shape `self.cols × other.cols`.
    pub fn transpose_mul(&self, other: &Matrix) -> Matrix {
        let mut out = Matrix::zeros(self.cols, other.cols);
        out.add_transpose_mul(1.0, self, other);
        out
    }

    /// `self += alpha · aᵗ · b`.
    pub fn add_transpose_mul(&mut self, alpha: f64, a: &Matrix, b: &Matrix) {
        debug_assert_eq!(a.rows, b.rows);
        debug_assert_eq!(self.shape(), (a.cols, b.cols));
        for r in 0..a.rows {
            let b_row = b.row(r);
            for (i, &a_ri) in a.row(r).iter().enumerate() {
                if a_ri == 0.0 {
                    continue;
                }
                axpy(alpha * a_ri, b_row, self.row_mut(i));
            }
        }
    }

    /// `self += alpha · a · b`.
    pub fn add_mul(&mut self, alpha: f64, a: &Matrix, b: &Matrix) {
        debug_assert_eq!(a.cols, b.rows);
        debug_assert_eq!(self.shape(), (a.rows, b.cols));
        for i in 0..a.rows {
            for (l, &a_il) in a.row(i).iter().enumerate() {
                if a_il == 0.0 {
                    continue;
                }
                axpy(alpha * a_il, b.row(l), self.row_mut(i));
            }
        }
    }

    /// `a · b`.
    pub fn matmul(&self, other: &Matrix) -> Matrix {
        let mut out = Matrix::zeros(self.rows, other.cols);
        out.add_mul(1.0, self, other);
        out
    }

    /// Rank-1 update `self += alpha · x ⊗ y` (BLAS `ger`).
    pub fn ger(&mut self, alpha: f64, x: &[f64], y: &[f64]) {
        debug_assert_eq!(x.len(), self.rows);
        debug_assert_eq!(y.len(), self.cols);
        for (i, &xi) in x.iter().enumerate() {
            if xi == 0.0 {
                continue;
            }
            axpy(alpha * xi, y, self.row_mut(i));
        }
    }

    // --- Elementwise ---

    pub fn scale(&mut self, s: f64) {
        for v in &mut self.data {
            *v *= s;
        }
    }

    /// Sum of squared entries.
    pub fn squared_norm(&self) -> f64 {
        dot(&self.data, &self.data)
    }

    /// Largest absolute asymmetry `|a_ij − a_ji|`; zero for symmetric matrices.
    pub fn max_asymmetry(&self) -> f64 {
        let mut worst = 0.0f64;
        for i in 0..self.rows {
            for j in (i + 1)..self.cols.min(self.rows) {
                worst = worst.max((self[(i, j)] - self[(j, i)]).abs());
            }
        }
        worst
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    #[inline]
    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[i * self.cols + j]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    #[inline]
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        &mut self.data[i * self.cols + j]
    }
}

/// Dot product of two equally sized slices.
#[cfg(feature = "simd")]
#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    use simsimd::SpatialSimilarity;
    f64::dot(a, b).unwrap_or_else(|| dot_raw(a, b))
}

/// Dot product of two equally sized slices.
#[cfg(not(feature = "simd"))]
#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    dot_raw(a, b)
}

#[inline]
fn dot_raw(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `y += alpha · x`.
#[inline]
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}
