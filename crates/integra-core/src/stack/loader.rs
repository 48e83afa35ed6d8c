use crate::fileset::Strip;

use super::{RejectionMatrix, StackEntry};

/// Fill `matrix` with the stacks of strip row `row`.
///
/// Every entry starts live with `raw == value == sample`; counts are reset
/// to the number of files and slopes to zero.
pub fn load_row(matrix: &mut RejectionMatrix, strip: &Strip, row: usize) {
    let files = matrix.files();
    for x in 0..matrix.width() {
        matrix.set_count(x, files);
        matrix.set_slope(x, 0.0);
        let stack = matrix.stack_mut(x);
        for (i, entry) in stack.iter_mut().enumerate() {
            *entry = StackEntry::new(strip.data[i][[row, x]] as f64, i);
        }
    }
}
