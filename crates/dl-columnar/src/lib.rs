#![forbid(unsafe_code)]

use dl_types::{
    DType, ErrorKind, NullKind, Scalar, TypeError, cast_scalar_owned, days_between, infer_dtype,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<bool>,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let bits = values.iter().map(|value| !value.is_missing()).collect();
        Self { bits }
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl ColumnError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LengthMismatch { .. } => ErrorKind::Shape,
            Self::Type(err) => err.kind(),
        }
    }
}

impl Column {
    /// Construct a column, coercing values to the target dtype.
    /// Takes ownership of the values vec and uses `cast_scalar_owned`
    /// to skip cloning when values already have the correct dtype.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let needs_coercion = values.iter().any(|v| {
            let d = v.dtype();
            d != dtype && d != DType::Null
        });

        let coerced = if needs_coercion {
            values
                .into_iter()
                .map(|value| cast_scalar_owned(value, dtype))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            // No coercion needed: values already match dtype.
            // Only remap Null variants to the dtype-specific missing marker.
            values
                .into_iter()
                .map(|value| match value {
                    Scalar::Null(_) => Scalar::missing_for_dtype(dtype),
                    other => other,
                })
                .collect()
        };

        let validity = ValidityMask::from_values(&coerced);

        Ok(Self {
            dtype,
            values: coerced,
            validity,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn from_bools(values: impl IntoIterator<Item = bool>) -> Self {
        let values = values.into_iter().map(Scalar::Bool).collect::<Vec<_>>();
        let validity = ValidityMask::from_values(&values);
        Self {
            dtype: DType::Bool,
            values,
            validity,
        }
    }

    #[must_use]
    pub fn from_optional_i64(values: impl IntoIterator<Item = Option<i64>>) -> Self {
        let values = values
            .into_iter()
            .map(|value| value.map_or(Scalar::Null(NullKind::Null), Scalar::Int64))
            .collect::<Vec<_>>();
        let validity = ValidityMask::from_values(&values);
        Self {
            dtype: DType::Int64,
            values,
            validity,
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    /// Gather rows by position; `None` (or an out-of-range position) yields
    /// the dtype's missing marker.
    pub fn reindex_by_positions(&self, positions: &[Option<usize>]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|slot| match slot {
                Some(idx) => self
                    .values
                    .get(*idx)
                    .cloned()
                    .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype)),
                None => Scalar::missing_for_dtype(self.dtype),
            })
            .collect::<Vec<_>>();

        Self::new(self.dtype, values)
    }

    /// Coerce text (or already-datetime) values to `DType::Datetime`.
    pub fn to_datetime(&self) -> Result<Self, ColumnError> {
        if self.dtype == DType::Datetime {
            return Ok(self.clone());
        }
        Self::new(DType::Datetime, self.values.clone())
    }

    /// Elementwise signed day difference `other - self` as an `Int64` column.
    ///
    /// Either side missing (or not a datetime) produces a missing difference.
    pub fn days_until(&self, other: &Self) -> Result<Self, ColumnError> {
        if self.len() != other.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: other.len(),
            });
        }

        Ok(Self::from_optional_i64(self.values.iter().zip(&other.values).map(
            |(start, end)| match (start.as_datetime(), end.as_datetime()) {
                (Some(start), Some(end)) => Some(days_between(start, end)),
                _ => None,
            },
        )))
    }
}
