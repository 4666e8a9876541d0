//! Conversions between reduction axes and variable categories.
//!
//! The axis is the dimension being summed over; the category is the index
//! dimension that remains after the reduction (`Vi` = 0, `Vj` = 1).

use crate::error::{Error, Result};

pub fn axis_to_cat(axis: u8) -> Result<u8> {
    match axis {
        0 | 1 => Ok((axis + 1) % 2),
        other => Err(Error::InvalidAxis(other)),
    }
}

pub fn cat_to_axis(cat: u8) -> Result<u8> {
    match cat {
        0 | 1 => Ok((cat + 1) % 2),
        other => Err(Error::InvalidCategory(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_and_category_are_swapped() {
        assert_eq!(axis_to_cat(0).ok(), Some(1));
        assert_eq!(axis_to_cat(1).ok(), Some(0));
        assert_eq!(cat_to_axis(0).ok(), Some(1));
        assert_eq!(cat_to_axis(1).ok(), Some(0));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(matches!(axis_to_cat(2), Err(Error::InvalidAxis(2))));
        assert!(matches!(cat_to_axis(7), Err(Error::InvalidCategory(7))));
    }
}
