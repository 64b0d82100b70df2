//! Plain-text problem format.
//!
//! ```text
//! n m
//! Q          n rows of n values
//! A          m rows of n values
//! lb         m values
//! ub         m values
//! lbx        n values
//! ubx        n values
//! c          n values
//! weights    m values      (optional)
//! soft       m values 0/1  (optional)
//! ```
//!
//! Values are whitespace separated; line breaks are not significant.

use nalgebra::{DMatrix, DVector};
use std::fmt;
use std::io::{Read, Write};
use std::str::{FromStr, SplitWhitespace};

use qpseq_types::{QpError, Result};

use crate::problem::QpProblem;
use crate::scalar::Scalar;

impl<T: Scalar> QpProblem<T> {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write!(writer, "{}", self)?;
        Ok(())
    }

    /// Reads one problem from `reader`, consuming it to the end.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        text.parse()
    }
}

fn write_row<T: Scalar>(f: &mut fmt::Formatter<'_>, values: impl Iterator<Item = T>) -> fmt::Result {
    let mut first = true;
    for v in values {
        if !first {
            f.write_str(" ")?;
        }
        write!(f, "{}", v)?;
        first = false;
    }
    writeln!(f)
}

impl<T: Scalar> fmt::Display for QpProblem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.num_vars();
        let m = self.num_constraints();
        writeln!(f, "{} {}", n, m)?;

        for i in 0..n {
            write_row(f, self.q.row(i).iter().copied())?;
        }
        for i in 0..m {
            write_row(f, self.a.row(i).iter().copied())?;
        }
        write_row(f, self.lb.iter().copied())?;
        write_row(f, self.ub.iter().copied())?;
        write_row(f, self.lbx.iter().copied())?;
        write_row(f, self.ubx.iter().copied())?;
        write_row(f, self.c.iter().copied())?;
        write_row(f, self.soft_weights.iter().copied())?;

        let flags: Vec<&str> = self
            .soft_convertible
            .iter()
            .map(|&s| if s { "1" } else { "0" })
            .collect();
        writeln!(f, "{}", flags.join(" "))
    }
}

struct Tokens<'a> {
    inner: SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Tokens { inner: text.split_whitespace() }
    }

    fn is_exhausted(&mut self) -> bool {
        self.inner.clone().next().is_none()
    }

    fn next_token(&mut self, section: &str) -> Result<&'a str> {
        self.inner
            .next()
            .ok_or_else(|| QpError::Parse(format!("unexpected end of input in {}", section)))
    }

    fn count(&mut self, section: &str) -> Result<usize> {
        let token = self.next_token(section)?;
        token
            .parse()
            .map_err(|_| QpError::Parse(format!("invalid {} '{}'", section, token)))
    }

    fn values<T: Scalar>(&mut self, len: usize, section: &str) -> Result<Vec<T>> {
        (0..len)
            .map(|_| {
                let token = self.next_token(section)?;
                token
                    .parse::<T>()
                    .map_err(|_| QpError::Parse(format!("invalid number '{}' in {}", token, section)))
            })
            .collect()
    }

    fn flags(&mut self, len: usize, section: &str) -> Result<Vec<bool>> {
        (0..len)
            .map(|_| match self.next_token(section)? {
                "1" | "true" => Ok(true),
                "0" | "false" => Ok(false),
                other => Err(QpError::Parse(format!("invalid flag '{}' in {}", other, section))),
            })
            .collect()
    }
}

impl<T: Scalar> FromStr for QpProblem<T> {
    type Err = QpError;

    fn from_str(text: &str) -> Result<Self> {
        let mut tokens = Tokens::new(text);
        let n = tokens.count("variable count")?;
        let m = tokens.count("constraint count")?;

        let q_len = n
            .checked_mul(n)
            .ok_or_else(|| QpError::Parse(format!("variable count {} too large", n)))?;
        let a_len = m
            .checked_mul(n)
            .ok_or_else(|| QpError::Parse(format!("constraint count {} too large", m)))?;

        let q = DMatrix::from_row_slice(n, n, &tokens.values::<T>(q_len, "Q")?);
        let a = DMatrix::from_row_slice(m, n, &tokens.values::<T>(a_len, "A")?);
        let lb = DVector::from_vec(tokens.values(m, "lb")?);
        let ub = DVector::from_vec(tokens.values(m, "ub")?);
        let lbx = DVector::from_vec(tokens.values(n, "lbx")?);
        let ubx = DVector::from_vec(tokens.values(n, "ubx")?);
        let c = DVector::from_vec(tokens.values(n, "c")?);

        let (soft_weights, soft_convertible) = if m > 0 && !tokens.is_exhausted() {
            let weights = DVector::from_vec(tokens.values(m, "soft weights")?);
            let flags = tokens.flags(m, "soft flags")?;
            (weights, flags)
        } else {
            (DVector::from_element(m, T::one()), vec![false; m])
        };

        if !tokens.is_exhausted() {
            return Err(QpError::Parse("trailing data after problem".to_string()));
        }

        let mut problem = QpProblem {
            q,
            c,
            a,
            lb,
            ub,
            lbx,
            ubx,
            soft_weights,
            soft_convertible,
        };
        problem.ensure_q_symmetry();
        Ok(problem)
    }
}
