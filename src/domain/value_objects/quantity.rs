use crate::domain::errors::ValidationError;

/// Validated order quantity: a strictly positive whole number of units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Quantity(i64);

impl Quantity {
    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if value <= 0 {
            return Err(ValidationError::NonPositiveQuantity);
        }
        Ok(Quantity(value))
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_multiple_of(&self, lot_size: i64) -> bool {
        lot_size > 0 && self.0 % lot_size == 0
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
