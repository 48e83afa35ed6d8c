use crate::pipeline::config::RangeRejection;
use crate::stack::RejectionMatrix;

/// Flag samples outside the valid range, in file order.
///
/// Runs before rejection normalization, so `value` still holds the source
/// sample. Returns the number of samples flagged.
pub fn range_reject(matrix: &mut RejectionMatrix, range: &RangeRejection) -> usize {
    let mut total = 0;
    for (_, stack, count) in matrix.columns_mut() {
        let mut nr = 0;
        for e in stack.iter_mut() {
            if range.clip_low && e.value <= range.low {
                e.reject_range_low = true;
                nr += 1;
            } else if range.clip_high && e.value >= range.high {
                e.reject_range_high = true;
                nr += 1;
            }
        }
        *count -= nr;
        total += nr;
    }
    total
}
