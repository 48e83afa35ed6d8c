use ndarray::Array2;

use super::build_rows;

/// Offsets of a disc of the given radius (diameter `2*radius + 1`).
fn disc_offsets(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    let r2 = r * r;
    let mut offsets = Vec::new();
    for dr in -r..=r {
        for dc in -r..=r {
            if dr * dr + dc * dc <= r2 {
                offsets.push((dr, dc));
            }
        }
    }
    offsets
}

/// Binary dilation with a circular structuring element.
///
/// A pixel becomes true if any pixel within `radius` of it is true.
/// Out-of-bounds neighbors count as false.
pub fn dilate_circular(mask: &Array2<bool>, radius: usize) -> Array2<bool> {
    if radius == 0 {
        return mask.clone();
    }
    let (h, w) = mask.dim();
    let offsets = disc_offsets(radius);
    build_rows(h, w, |row, col| {
        offsets.iter().any(|&(dr, dc)| {
            let nr = row as isize + dr;
            let nc = col as isize + dc;
            nr >= 0 && nr < h as isize && nc >= 0 && nc < w as isize && mask[[nr as usize, nc as usize]]
        })
    })
}
