//! Threshold segmentation and connected-component labeling.
//!
//! Converts a detection image into a binary mask and labels connected
//! regions with a two-pass union-find algorithm. Both 4- and
//! 8-connectivity are supported; source extraction uses 8-connectivity so
//! that diagonally touching pixels of one object stay together.

use ndarray::{Array2, ArrayView2};

use crate::image_proc::bbox::BBox;

/// Pixel neighbourhood used when joining foreground pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    /// Horizontal and vertical neighbours only
    Four,
    /// Horizontal, vertical and diagonal neighbours
    #[default]
    Eight,
}

/// Binary mask of pixels strictly above `threshold`.
pub fn threshold_mask(image: &ArrayView2<f64>, threshold: f64) -> Array2<bool> {
    image.mapv(|pixel| pixel > threshold)
}

/// Find the root label with path halving.
fn find_root(labels: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while current != labels[current] {
        labels[current] = labels[labels[current]];
        current = labels[current];
    }
    current
}

/// Join two label sets, keeping the smaller root as canonical.
fn union_labels(labels: &mut [usize], label1: usize, label2: usize) {
    let root1 = find_root(labels, label1);
    let root2 = find_root(labels, label2);
    if root1 < root2 {
        labels[root2] = root1;
    } else if root2 < root1 {
        labels[root1] = root2;
    }
}

/// Two-pass connected-component labeling.
///
/// Background pixels get label 0; objects get consecutive labels starting
/// at 1, numbered in raster order of their first pixel.
pub fn connected_components(mask: &ArrayView2<bool>, connectivity: Connectivity) -> Array2<usize> {
    let (height, width) = mask.dim();
    let mut labels = Array2::<usize>::zeros((height, width));
    let mut parent_table = vec![0usize];
    let mut neighbors: Vec<usize> = Vec::with_capacity(4);

    for i in 0..height {
        for j in 0..width {
            if !mask[[i, j]] {
                continue;
            }

            // Already-visited neighbours: up, left and (8-conn) both upper diagonals
            neighbors.clear();
            if i > 0 && labels[[i - 1, j]] > 0 {
                neighbors.push(labels[[i - 1, j]]);
            }
            if j > 0 && labels[[i, j - 1]] > 0 {
                neighbors.push(labels[[i, j - 1]]);
            }
            if connectivity == Connectivity::Eight && i > 0 {
                if j > 0 && labels[[i - 1, j - 1]] > 0 {
                    neighbors.push(labels[[i - 1, j - 1]]);
                }
                if j + 1 < width && labels[[i - 1, j + 1]] > 0 {
                    neighbors.push(labels[[i - 1, j + 1]]);
                }
            }

            match neighbors.iter().copied().min() {
                None => {
                    let label = parent_table.len();
                    parent_table.push(label);
                    labels[[i, j]] = label;
                }
                Some(min_label) => {
                    labels[[i, j]] = min_label;
                    for &other in &neighbors {
                        if other != min_label {
                            union_labels(&mut parent_table, min_label, other);
                        }
                    }
                }
            }
        }
    }

    for i in 1..parent_table.len() {
        find_root(&mut parent_table, i);
    }

    // Roots are always the smallest label of their set, so scanning labels in
    // increasing order numbers components by their first pixel.
    let mut relabel_map = vec![0usize; parent_table.len()];
    let mut next_label = 1;
    for i in 1..parent_table.len() {
        let root = find_root(&mut parent_table, i);
        if relabel_map[root] == 0 {
            relabel_map[root] = next_label;
            next_label += 1;
        }
        relabel_map[i] = relabel_map[root];
    }

    labels.mapv_inplace(|label| relabel_map[label]);
    labels
}

/// Bounding box and pixel count per label; index `i` holds label `i + 1`.
pub fn component_extents(labeled: &ArrayView2<usize>) -> Vec<(BBox, usize)> {
    let max_label = labeled.iter().copied().max().unwrap_or(0);
    let mut extents = vec![(BBox::default(), 0usize); max_label];

    for ((row, col), &label) in labeled.indexed_iter() {
        if label > 0 {
            let (bbox, count) = &mut extents[label - 1];
            bbox.expand_to_include(row, col);
            *count += 1;
        }
    }
    extents
}
