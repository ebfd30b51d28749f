//! Small dense matrices for the model fits
//!
//! Design matrices here have a handful of fixed-effect columns and at most a
//! few dozen random-effect levels, so a row-major `Vec<f64>` with
//! Gauss-Jordan inversion is all the models need.

use std::ops::{Index, IndexMut};

/// Pivots smaller than this (relative to the largest diagonal) count as singular
const SINGULAR_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    /// Build from row slices; all rows must have the same length
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut m = Self::zeros(rows.len(), cols);
        for (i, row) in rows.iter().enumerate() {
            debug_assert_eq!(row.len(), cols);
            m.data[i * cols..(i + 1) * cols].copy_from_slice(row);
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn transpose(&self) -> Self {
        let mut t = Self::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                t[(j, i)] = self[(i, j)];
            }
        }
        t
    }

    pub fn mul(&self, other: &Matrix) -> Self {
        debug_assert_eq!(self.cols, other.rows);
        let mut out = Self::zeros(self.rows, other.cols);
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self[(i, k)];
                if a == 0.0 {
                    continue;
                }
                for j in 0..other.cols {
                    out[(i, j)] += a * other[(k, j)];
                }
            }
        }
        out
    }

    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        debug_assert_eq!(self.cols, v.len());
        (0..self.rows)
            .map(|i| (0..self.cols).map(|j| self[(i, j)] * v[j]).sum())
            .collect()
    }

    /// `A' A` without materializing the transpose
    pub fn gram(&self) -> Self {
        let mut out = Self::zeros(self.cols, self.cols);
        for r in 0..self.rows {
            for i in 0..self.cols {
                let a = self[(r, i)];
                if a == 0.0 {
                    continue;
                }
                for j in 0..self.cols {
                    out[(i, j)] += a * self[(r, j)];
                }
            }
        }
        out
    }

    /// `A' v`
    pub fn t_mul_vec(&self, v: &[f64]) -> Vec<f64> {
        debug_assert_eq!(self.rows, v.len());
        let mut out = vec![0.0; self.cols];
        for r in 0..self.rows {
            for (j, o) in out.iter_mut().enumerate() {
                *o += self[(r, j)] * v[r];
            }
        }
        out
    }

    /// Inverse by Gauss-Jordan elimination with partial pivoting; `None` if singular
    pub fn inverse(&self) -> Option<Matrix> {
        if self.rows != self.cols {
            return None;
        }
        let n = self.rows;
        let scale = (0..n)
            .map(|i| self[(i, i)].abs())
            .fold(0.0_f64, f64::max)
            .max(1.0);

        let mut a = self.clone();
        let mut inv = Matrix::identity(n);

        for col in 0..n {
            let pivot_row = (col..n).max_by(|&x, &y| {
                a[(x, col)]
                    .abs()
                    .partial_cmp(&a[(y, col)].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;
            let pivot = a[(pivot_row, col)];
            if !pivot.is_finite() || pivot.abs() < SINGULAR_TOLERANCE * scale {
                return None;
            }
            if pivot_row != col {
                a.swap_rows(pivot_row, col);
                inv.swap_rows(pivot_row, col);
            }

            for j in 0..n {
                a[(col, j)] /= pivot;
                inv[(col, j)] /= pivot;
            }
            for row in 0..n {
                if row == col {
                    continue;
                }
                let factor = a[(row, col)];
                if factor == 0.0 {
                    continue;
                }
                for j in 0..n {
                    let (pa, pi) = (a[(col, j)], inv[(col, j)]);
                    a[(row, j)] -= factor * pa;
                    inv[(row, j)] -= factor * pi;
                }
            }
        }
        Some(inv)
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        for j in 0..self.cols {
            self.data.swap(a * self.cols + j, b * self.cols + j);
        }
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[i * self.cols + j]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        &mut self.data[i * self.cols + j]
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
